//! The body of one worker process.
//!
//! Runs inside its own OS process, isolated from the scheduler. Errors are
//! recorded in the job row and observed by the supervisor's reap cycle;
//! they never propagate back to the control process as exceptions.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::backups::{enqueue_if_needed, prune_terminal_jobs};
use crate::config::Settings;
use crate::db::entities::backup;
use crate::db::entities::backup_file::FileType;
use crate::db::entities::backup_job::{self, JobStatus};
use crate::db::Database;
use crate::error::{FetchError, WorkerError};
use crate::index::{ChangeIndex, ConfigSet};
use crate::inventory::{ConfigFetcher, FetchedConfig, Inventory};
use crate::jobs::eligibility::{address, can_backup};
use crate::jobs::fail_job;
use crate::store::GitStore;

/// Worker-process entry point. Opens its own database connection, runs the
/// backup, and maps any unexpected error onto the job row. Termination
/// signals make the worker exit promptly without further state mutation.
pub async fn execute(
	settings: &Settings,
	inventory: &dyn Inventory,
	fetcher: &dyn ConfigFetcher,
	job_id: i32,
) -> anyhow::Result<()> {
	let db = Database::open(&settings.database).await?;

	let mut sigterm = signal(SignalKind::terminate())?;
	let mut sigint = signal(SignalKind::interrupt())?;

	tokio::select! {
		result = run_backup(db.conn(), settings, inventory, fetcher, job_id) => {
			if let Err(e) = result {
				error!("unexpected error in job {job_id}: {e}");
				if let Some(job) = backup_job::Entity::find_by_id(job_id).one(db.conn()).await? {
					if !job.job_status().is_terminal() {
						fail_job(db.conn(), job, JobStatus::Errored, &e.to_string()).await?;
					}
				}
			}
		}
		_ = sigterm.recv() => info!("worker for job {job_id} exiting: SIGTERM"),
		_ = sigint.recv() => info!("worker for job {job_id} exiting: SIGINT"),
	}

	Ok(())
}

pub async fn run_backup(
	db: &DatabaseConnection,
	settings: &Settings,
	inventory: &dyn Inventory,
	fetcher: &dyn ConfigFetcher,
	job_id: i32,
) -> Result<(), WorkerError> {
	info!("starting backup for job {job_id}");
	let job = backup_job::Entity::find_by_id(job_id)
		.one(db)
		.await?
		.ok_or(WorkerError::JobNotFound(job_id))?;
	let backup = backup::Entity::find_by_id(job.backup_id)
		.one(db)
		.await?
		.ok_or(WorkerError::BackupNotFound(job.backup_id))?;

	let mut active: backup_job::ActiveModel = job.into();
	active.status = Set(JobStatus::Running.to_string());
	active.started = Set(Some(Utc::now()));
	active.pid = Set(Some(std::process::id() as i64));
	let job = active.update(db).await?;

	let device = match &backup.device {
		Some(name) => inventory.device(name).await,
		None => None,
	};
	if let Err(reason) = can_backup(&backup, device.as_ref()) {
		warn!("cannot backup {}: {reason}", backup.name);
		fail_job(
			db,
			job,
			JobStatus::Failed,
			&format!("Cannot backup {}: {reason}", backup.name),
		)
		.await?;
		return Ok(());
	}
	let Some(device) = device else {
		fail_job(db, job, JobStatus::Failed, "No device set").await?;
		return Ok(());
	};
	let Some(host) = address(&backup, Some(&device)) else {
		fail_job(
			db,
			job,
			JobStatus::Failed,
			&format!("{}: No IP set", backup.name),
		)
		.await?;
		return Ok(());
	};

	let fetched = match fetcher.fetch(&device, &host).await {
		Ok(fetched) => fetched,
		Err(e) => {
			let status = match e {
				// Connectivity, auth and timeout trouble is routine; the
				// next recurrence retries. Garbled driver output is not.
				FetchError::BadOutput(_) => JobStatus::Errored,
				_ => JobStatus::Failed,
			};
			warn!("fetch from {} ({host}) failed: {e}", device.name);
			fail_job(db, job, status, &e.to_string()).await?;
			return Ok(());
		}
	};

	let backup = update_config_saved(db, backup, &fetched).await?;

	match store_snapshot(db, settings, &backup, &device.name, &fetched).await {
		Ok(commit) => {
			match &commit {
				Some(sha) => info!("{}: backup complete, commit {sha}", backup.name),
				None => info!("{}: backup complete, no changes", backup.name),
			}
			complete_job(db, job, commit.as_deref()).await?;

			let frequency = chrono::Duration::seconds(settings.frequency as i64);
			enqueue_if_needed(db, &backup, Utc::now() + frequency).await?;
			prune_terminal_jobs(db, backup.id).await?;
		}
		Err(e) => {
			// Store/index failures indicate state corruption, not transient
			// device trouble. Escalate.
			error!("{}: store failure: {e}", backup.name);
			fail_job(db, job, JobStatus::Errored, &e.to_string()).await?;
		}
	}

	Ok(())
}

async fn update_config_saved(
	db: &DatabaseConnection,
	backup: backup::Model,
	fetched: &FetchedConfig,
) -> Result<backup::Model, WorkerError> {
	if fetched.config_saved.is_none() || fetched.config_saved == backup.config_saved {
		return Ok(backup);
	}
	let mut active: backup::ActiveModel = backup.into();
	active.config_saved = Set(fetched.config_saved);
	Ok(active.update(db).await?)
}

async fn store_snapshot(
	db: &DatabaseConnection,
	settings: &Settings,
	backup: &backup::Model,
	device_name: &str,
	fetched: &FetchedConfig,
) -> Result<Option<String>, WorkerError> {
	let store = GitStore::open(settings)?;
	let index = ChangeIndex::new(db, &store);

	let configs = ConfigSet {
		running: fetched.running.clone(),
		startup: fetched.startup.clone(),
	};
	let commit = index.set_config(backup, device_name, &configs).await?;

	if let Some(time) = fetched.running_changed {
		index
			.record_last_change(backup, FileType::Running, time)
			.await?;
	}
	if let Some(time) = fetched.startup_changed {
		index
			.record_last_change(backup, FileType::Startup, time)
			.await?;
	}

	Ok(commit)
}

async fn complete_job(
	db: &DatabaseConnection,
	job: backup_job::Model,
	commit: Option<&str>,
) -> Result<(), WorkerError> {
	let mut data = job.data.clone().unwrap_or_else(|| serde_json::json!({}));
	if let Some(map) = data.as_object_mut() {
		map.insert(
			"commit".to_string(),
			serde_json::Value::String(commit.unwrap_or_default().to_string()),
		);
	}
	let mut active: backup_job::ActiveModel = job.into();
	active.status = Set(JobStatus::Completed.to_string());
	active.completed = Set(Some(Utc::now()));
	active.data = Set(Some(data));
	active.update(db).await?;
	Ok(())
}
