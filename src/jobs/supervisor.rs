//! Per-job OS process supervision.
//!
//! Each backup attempt runs in its own process so device I/O libraries and
//! per-session state cannot leak across attempts or block the scheduler.
//! The supervisor owns the process table, reaps exits, and reconciles exit
//! state with the job rows, since a worker may have died before writing its
//! own terminal status.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use tokio::process::{Child, Command};
use tracing::{debug, error, warn};

use crate::db::entities::backup_job::{self, JobStatus};
use crate::jobs::fail_job;

/// How a worker process for a given job id is spawned. The production
/// spawner re-executes the current binary with the internal `worker`
/// subcommand; tests substitute any short-lived command.
#[derive(Debug, Clone)]
pub struct WorkerSpawner {
	program: PathBuf,
	args: Vec<String>,
}

impl WorkerSpawner {
	pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
		Self {
			program: program.into(),
			args,
		}
	}

	/// Spawner for `<current exe> --config <path> worker --job <id>`.
	pub fn current_exe(config: &Path) -> std::io::Result<Self> {
		let program = std::env::current_exe()?;
		Ok(Self::new(
			program,
			vec![
				"--config".to_string(),
				config.display().to_string(),
				"worker".to_string(),
				"--job".to_string(),
			],
		))
	}

	fn command(&self, job_id: i32) -> Command {
		let mut command = Command::new(&self.program);
		command.args(&self.args).arg(job_id.to_string());
		command
	}
}

struct TrackedProcess {
	child: Child,
	job_id: i32,
}

pub struct ProcessSupervisor {
	db: DatabaseConnection,
	spawner: WorkerSpawner,
	/// Started-but-unfinished ceiling, the configured backup frequency.
	stuck_window: chrono::Duration,
	processes: HashMap<i32, TrackedProcess>,
}

impl ProcessSupervisor {
	pub fn new(db: DatabaseConnection, spawner: WorkerSpawner, frequency: Duration) -> Self {
		Self {
			db,
			spawner,
			stuck_window: chrono::Duration::seconds(frequency.as_secs() as i64),
			processes: HashMap::new(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.processes.is_empty()
	}

	pub fn len(&self) -> usize {
		self.processes.len()
	}

	pub fn is_tracking(&self, backup_id: i32) -> bool {
		self.processes.contains_key(&backup_id)
	}

	/// Forks a worker for `job` and tracks it under its entity. A short
	/// grace join surfaces immediate spawn failures; anything later is
	/// caught by the reap cycle.
	pub async fn fork(&mut self, job: backup_job::Model) -> Result<(), DbErr> {
		let backup_id = job.backup_id;
		let job_id = job.id;
		match self.spawner.command(job_id).spawn() {
			Ok(child) => {
				debug!(
					"forked process {:?} for backup {backup_id} job {job_id}",
					child.id()
				);
				self.processes
					.insert(backup_id, TrackedProcess { child, job_id });
				tokio::time::sleep(Duration::from_secs(1)).await;
			}
			Err(e) => {
				error!("failed to fork worker for job {job_id}: {e}");
				fail_job(&self.db, job, JobStatus::Failed, &e.to_string()).await?;
			}
		}
		Ok(())
	}

	/// Removes exited processes from the table and reconciles their jobs:
	/// a worker that died without reaching a terminal status is errored.
	pub async fn reap(&mut self) -> Result<(), DbErr> {
		let mut exited = Vec::new();
		for (backup_id, tracked) in self.processes.iter_mut() {
			match tracked.child.try_wait() {
				Ok(Some(_)) => exited.push(*backup_id),
				Ok(None) => {}
				Err(e) => {
					warn!("cannot poll worker for backup {backup_id}: {e}");
					exited.push(*backup_id);
				}
			}
		}

		for backup_id in exited {
			let Some(mut tracked) = self.processes.remove(&backup_id) else {
				continue;
			};
			tracked.child.kill().await.ok();
			debug!("reaped worker for backup {backup_id} job {}", tracked.job_id);

			let job = backup_job::Entity::find_by_id(tracked.job_id)
				.one(&self.db)
				.await?;
			if let Some(job) = job {
				if !job.job_status().is_terminal() {
					warn!(
						"worker for backup {backup_id} exited without finishing job {}",
						job.id
					);
					fail_job(
						&self.db,
						job,
						JobStatus::Errored,
						"Process terminated for unknown reason",
					)
					.await?;
				}
			}
		}
		Ok(())
	}

	/// Kills jobs that started but ran past the frequency window. This is
	/// the independent ceiling for started jobs, distinct from the 30-minute
	/// enqueued-staleness check.
	pub async fn handle_stuck_jobs(&mut self) -> Result<(), DbErr> {
		let cutoff = Utc::now() - self.stuck_window;
		let stuck = backup_job::Entity::find()
			.filter(backup_job::Column::Status.is_in([
				JobStatus::Running.to_string(),
				JobStatus::Pending.to_string(),
			]))
			.filter(backup_job::Column::Started.lt(cutoff))
			.all(&self.db)
			.await?;

		for job in stuck {
			if let Some(mut tracked) = self.processes.remove(&job.backup_id) {
				warn!("terminating stuck worker for backup {}", job.backup_id);
				tracked.child.kill().await.ok();
			}
			fail_job(&self.db, job, JobStatus::Errored, "Process terminated").await?;
		}
		Ok(())
	}

	/// Termination-signal handling: force-error every tracked job with the
	/// signal name, kill the children, and clear the table.
	pub async fn drain(&mut self, signal: &str) -> Result<(), DbErr> {
		for (backup_id, mut tracked) in self.processes.drain() {
			warn!("draining worker for backup {backup_id}: {signal}");
			let job = backup_job::Entity::find_by_id(tracked.job_id)
				.one(&self.db)
				.await?;
			if let Some(job) = job {
				if !job.job_status().is_terminal() {
					fail_job(&self.db, job, JobStatus::Errored, signal).await?;
				}
			}
			tracked.child.kill().await.ok();
		}
		Ok(())
	}
}
