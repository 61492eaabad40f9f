//! Git-backed configuration store.
//!
//! One non-bare repository holds every entity's snapshots as flat files
//! named `{uuid}.{kind}`, in a single linear history. The repository is the
//! authoritative record: the relational index is rebuilt from `log`, never
//! the other way around.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use git2::{Delta, DiffOptions, ErrorCode, Repository, Signature};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::StoreError;

pub mod differ;

pub use differ::{DiffLine, DiffMode, Differ};

/// Commit-time lock contention policy: brief contention is tolerated,
/// anything past this is surfaced as an integrity failure.
const LOCK_RETRIES: u32 = 10;
const LOCK_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
	Add,
	Modify,
}

impl ChangeKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Add => "add",
			Self::Modify => "modify",
		}
	}
}

impl std::fmt::Display for ChangeKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One side of a changed-file entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
	pub path: String,
	pub sha: String,
}

/// One changed file within a commit, as reported by the store itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeChange {
	pub kind: ChangeKind,
	pub old: Option<ObjectRef>,
	pub new: Option<ObjectRef>,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
	pub sha: String,
	pub time: DateTime<Utc>,
	pub author: String,
	pub committer: String,
	pub message: String,
	pub parents: Vec<String>,
	pub changes: Vec<TreeChange>,
}

pub struct GitStore {
	repository: Repository,
	workdir: PathBuf,
	committer: (String, String),
	author: (String, String),
}

impl GitStore {
	/// Opens the repository at the configured location, initializing an
	/// empty one on first use.
	pub fn open(settings: &Settings) -> Result<Self, StoreError> {
		let location = &settings.repository;
		let repository = if location.join(".git").exists() {
			Repository::open(location)?
		} else {
			info!("initializing configuration repository at {}", location.display());
			Repository::init(location)?
		};
		let workdir = repository
			.workdir()
			.ok_or_else(|| StoreError::NoWorkdir(location.clone()))?
			.to_path_buf();

		Ok(Self {
			repository,
			workdir,
			committer: Settings::identity(&settings.committer),
			author: Settings::identity(settings.author()),
		})
	}

	/// Stages `content` for `path`. Re-staging before a commit replaces the
	/// previous staged content.
	pub fn write(&self, path: &str, content: &str) -> Result<(), StoreError> {
		std::fs::write(self.workdir.join(path), content)?;
		let mut index = self.repository.index()?;
		index.add_path(Path::new(path))?;
		index.write()?;
		Ok(())
	}

	/// Commits all staged writes as one revision and returns its sha.
	///
	/// Writers serialize on the repository lock; contention is retried at
	/// 1-second spacing before giving up.
	pub fn commit(&self, message: &str) -> Result<String, StoreError> {
		for attempt in 1..=LOCK_RETRIES {
			match self.try_commit(message) {
				Ok(sha) => return Ok(sha),
				Err(e) if e.code() == ErrorCode::Locked => {
					warn!("repository locked, retrying commit (attempt {attempt}/{LOCK_RETRIES})");
					std::thread::sleep(LOCK_RETRY_DELAY);
				}
				Err(e) => return Err(e.into()),
			}
		}
		Err(StoreError::LockNotAcquired(LOCK_RETRIES))
	}

	fn try_commit(&self, message: &str) -> Result<String, git2::Error> {
		let mut index = self.repository.index()?;
		let tree_id = index.write_tree()?;
		let tree = self.repository.find_tree(tree_id)?;

		let author = Signature::now(&self.author.0, &self.author.1)?;
		let committer = Signature::now(&self.committer.0, &self.committer.1)?;

		let parent = match self.repository.head() {
			Ok(head) => Some(head.peel_to_commit()?),
			Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
				None
			}
			Err(e) => return Err(e),
		};
		let parents: Vec<&git2::Commit> = parent.iter().collect();

		let oid = self
			.repository
			.commit(Some("HEAD"), &author, &committer, message, &tree, &parents)?;
		Ok(oid.to_string())
	}

	/// Content of `path` at `revision` (HEAD when `None`). A path that does
	/// not exist at that revision is `Ok(None)`, never an error.
	pub fn read(&self, path: &str, revision: Option<&str>) -> Result<Option<String>, StoreError> {
		let commit = match self.resolve(revision)? {
			Some(commit) => commit,
			None => return Ok(None),
		};
		let tree = commit.tree()?;
		let entry = match tree.get_path(Path::new(path)) {
			Ok(entry) => entry,
			Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
			Err(e) => return Err(e.into()),
		};
		let blob = self.repository.find_blob(entry.id())?;
		let content = std::str::from_utf8(blob.content())
			.map_err(|_| StoreError::InvalidContent(path.to_string()))?;
		Ok(Some(content.to_string()))
	}

	fn resolve(&self, revision: Option<&str>) -> Result<Option<git2::Commit<'_>>, StoreError> {
		let spec = revision.unwrap_or("HEAD");
		match self.repository.revparse_single(spec) {
			Ok(object) => Ok(Some(object.peel_to_commit()?)),
			Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
				// Empty repository or unknown revision: nothing to read.
				Ok(None)
			}
			Err(e) => Err(e.into()),
		}
	}

	/// History entries newest-first, each carrying the changed-file list
	/// against its first parent. `paths` filters to commits touching any of
	/// the given paths; `depth` bounds the number of returned entries.
	pub fn log(
		&self,
		paths: &[&str],
		from_revision: Option<&str>,
		depth: Option<usize>,
	) -> Result<Vec<LogEntry>, StoreError> {
		let start = match self.resolve(from_revision)? {
			Some(commit) => commit.id(),
			None => return Ok(Vec::new()),
		};

		let mut walk = self.repository.revwalk()?;
		walk.push(start)?;

		let mut entries = Vec::new();
		for oid in walk {
			let oid = oid?;
			let commit = self.repository.find_commit(oid)?;
			let changes = self.changes_for(&commit, paths)?;
			if !paths.is_empty() && changes.is_empty() {
				continue;
			}
			entries.push(self.entry_for(&commit, changes));
			if let Some(depth) = depth {
				if entries.len() >= depth {
					break;
				}
			}
		}

		debug!("store log produced {} entries", entries.len());
		Ok(entries)
	}

	fn changes_for(
		&self,
		commit: &git2::Commit<'_>,
		paths: &[&str],
	) -> Result<Vec<TreeChange>, StoreError> {
		let tree = commit.tree()?;
		let parent_tree = match commit.parent(0) {
			Ok(parent) => Some(parent.tree()?),
			Err(_) => None,
		};

		let mut opts = DiffOptions::new();
		for path in paths {
			opts.pathspec(path);
		}
		let diff = self.repository.diff_tree_to_tree(
			parent_tree.as_ref(),
			Some(&tree),
			Some(&mut opts),
		)?;

		let mut changes = Vec::new();
		for delta in diff.deltas() {
			let kind = match delta.status() {
				Delta::Added => ChangeKind::Add,
				Delta::Modified => ChangeKind::Modify,
				// Snapshots are never renamed or removed by normal
				// operation; anything else in the history is ignored.
				_ => continue,
			};
			let side = |file: git2::DiffFile<'_>| -> Option<ObjectRef> {
				if file.id().is_zero() {
					return None;
				}
				let path = file.path()?.to_str()?.to_string();
				Some(ObjectRef {
					path,
					sha: file.id().to_string(),
				})
			};
			changes.push(TreeChange {
				kind,
				old: side(delta.old_file()),
				new: side(delta.new_file()),
			});
		}
		Ok(changes)
	}

	fn entry_for(&self, commit: &git2::Commit<'_>, changes: Vec<TreeChange>) -> LogEntry {
		let identity = |sig: &Signature<'_>| {
			format!(
				"{} <{}>",
				sig.name().unwrap_or_default(),
				sig.email().unwrap_or_default()
			)
		};
		LogEntry {
			sha: commit.id().to_string(),
			time: Utc
				.timestamp_opt(commit.time().seconds(), 0)
				.single()
				.unwrap_or_else(Utc::now),
			author: identity(&commit.author()),
			committer: identity(&commit.committer()),
			message: commit.message().unwrap_or_default().to_string(),
			parents: commit.parent_ids().map(|id| id.to_string()).collect(),
			changes,
		}
	}

	/// Unified diff of `path` between two revisions. Content missing at
	/// either revision diffs as empty.
	pub fn diff(
		&self,
		path: &str,
		revision_a: Option<&str>,
		revision_b: Option<&str>,
	) -> Result<String, StoreError> {
		let a = self.read(path, revision_a)?.unwrap_or_default();
		let b = self.read(path, revision_b)?.unwrap_or_default();
		Ok(Differ::new().unified(path, &a, &b))
	}
}
