//! Error taxonomy for the backup core.
//!
//! Split per layer: store failures, index failures, fetch failures, and the
//! worker-level aggregation that maps each onto a terminal job status.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
	#[error("Git error: {0}")]
	Git(#[from] git2::Error),
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
	#[error("repository lock not acquired after {0} attempts")]
	LockNotAcquired(u32),
	#[error("stored content at '{0}' is not valid UTF-8")]
	InvalidContent(String),
	#[error("repository has no working tree: {}", .0.display())]
	NoWorkdir(PathBuf),
}

#[derive(Error, Debug)]
pub enum IndexError {
	#[error("Database error: {0}")]
	Database(#[from] sea_orm::DbErr),
	#[error("Store error: {0}")]
	Store(#[from] StoreError),
	#[error("commit {0} already exists in the index")]
	DuplicateCommit(String),
	#[error("commit {0} vanished from the store log")]
	MissingLogEntry(String),
}

/// Failures talking to a device. These are expected-but-unplanned: the job
/// terminates `Failed` and the next scheduled recurrence retries.
#[derive(Error, Debug)]
pub enum FetchError {
	#[error("timeout connecting to {host}")]
	Timeout { host: String },
	#[error("authentication failed for {host}")]
	Auth { host: String },
	#[error("error connecting to {host}: {detail}")]
	Connect { host: String, detail: String },
	#[error("driver '{driver}' failed: {detail}")]
	Driver { driver: String, detail: String },
	#[error("driver produced unreadable output: {0}")]
	BadOutput(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
	#[error("Database error: {0}")]
	Database(#[from] sea_orm::DbErr),
	#[error("Store error: {0}")]
	Store(#[from] StoreError),
	#[error("Index error: {0}")]
	Index(#[from] IndexError),
	#[error("Fetch error: {0}")]
	Fetch(#[from] FetchError),
	#[error("job {0} not found")]
	JobNotFound(i32),
	#[error("backup {0} not found")]
	BackupNotFound(i32),
}
