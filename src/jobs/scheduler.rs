//! The periodic control loop.
//!
//! Each activation: reclaim stale/missed jobs, schedule eligible targets,
//! claim due jobs for this run, hand them to the process supervisor, then
//! poll at 1-second intervals until no worker remains, applying stuck-job
//! reclamation each iteration and draining on termination signals.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{
	ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
	QueryOrder, Set,
};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backups::{enqueued_jobs, enqueue_if_needed};
use crate::config::Settings;
use crate::db::entities::backup;
use crate::db::entities::backup_job::{self, JobStatus};
use crate::inventory::Inventory;
use crate::jobs::eligibility::can_backup;
use crate::jobs::fail_job;
use crate::jobs::supervisor::{ProcessSupervisor, WorkerSpawner};

/// Enqueued jobs older than this are considered hung regardless of the
/// configured frequency.
const STALE_WINDOW_MINUTES: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupScope {
	All,
	Device(String),
	Backup(i32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanStats {
	pub hung: usize,
	pub missed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
	pub clean: CleanStats,
	pub scheduled: usize,
	pub forked: usize,
	/// Set when a termination signal cut the run short.
	pub drained: Option<&'static str>,
}

pub struct BackupRunner {
	db: DatabaseConnection,
	inventory: Arc<dyn Inventory>,
	settings: Settings,
	supervisor: ProcessSupervisor,
}

impl BackupRunner {
	pub fn new(
		db: DatabaseConnection,
		inventory: Arc<dyn Inventory>,
		spawner: WorkerSpawner,
		settings: Settings,
	) -> Self {
		let supervisor = ProcessSupervisor::new(db.clone(), spawner, settings.frequency());
		Self {
			db,
			inventory,
			settings,
			supervisor,
		}
	}

	/// Housekeeping: fail enqueued jobs stuck past the staleness window
	/// ("hung"), and when several jobs are enqueued for one entity keep only
	/// the most recently scheduled ("missed"). Restores the
	/// at-most-one-in-flight invariant after races.
	pub async fn clean_stale_jobs(&self) -> Result<CleanStats, DbErr> {
		info!("starting stale job cleanup");
		let mut stats = CleanStats::default();

		let cutoff = Utc::now() - chrono::Duration::minutes(STALE_WINDOW_MINUTES);
		let hung = backup_job::Entity::find()
			.filter(
				backup_job::Column::Status
					.is_in(JobStatus::ENQUEUED.map(|s| s.to_string())),
			)
			.filter(backup_job::Column::Scheduled.lt(cutoff))
			.order_by_asc(backup_job::Column::Created)
			.all(&self.db)
			.await?;
		for job in hung {
			warn!("job {} for backup {} appears hung, failing", job.id, job.backup_id);
			fail_job(&self.db, job, JobStatus::Failed, "Job hung").await?;
			stats.hung += 1;
		}

		let scheduled = backup_job::Entity::find()
			.filter(backup_job::Column::Status.eq(JobStatus::Scheduled.to_string()))
			.order_by_asc(backup_job::Column::Scheduled)
			.order_by_asc(backup_job::Column::Id)
			.all(&self.db)
			.await?;
		for (position, job) in scheduled.iter().enumerate() {
			let is_last_for_backup = !scheduled[position + 1..]
				.iter()
				.any(|other| other.backup_id == job.backup_id);
			if !is_last_for_backup {
				warn!(
					"job {} for backup {} appears to have been missed, failing",
					job.id, job.backup_id
				);
				fail_job(&self.db, job.clone(), JobStatus::Failed, "Job missed").await?;
				stats.missed += 1;
			}
		}

		Ok(stats)
	}

	/// Creates `Scheduled` jobs for every eligible in-scope entity without
	/// enqueued work; entities that lost eligibility get their enqueued jobs
	/// failed instead.
	pub async fn schedule_jobs(&self, scope: &BackupScope) -> Result<usize, DbErr> {
		let mut query = backup::Entity::find();
		query = match scope {
			BackupScope::All => query,
			BackupScope::Device(device) => query.filter(backup::Column::Device.eq(device.as_str())),
			BackupScope::Backup(id) => query.filter(backup::Column::Id.eq(*id)),
		};
		let backups = query.all(&self.db).await?;

		let frequency = chrono::Duration::seconds(self.settings.frequency as i64);
		let mut scheduled = 0;

		for target in backups {
			let device = match &target.device {
				Some(name) => self.inventory.device(name).await,
				None => None,
			};
			match can_backup(&target, device.as_ref()) {
				Ok(()) => {
					let existing = enqueued_jobs(&self.db, target.id).await?;
					if !existing.is_empty() {
						continue;
					}
					let last = backup_job::Entity::find()
						.filter(backup_job::Column::BackupId.eq(target.id))
						.order_by_desc(backup_job::Column::Scheduled)
						.one(&self.db)
						.await?;
					let now = Utc::now();
					let next = match last.and_then(|job| job.scheduled) {
						Some(previous) if previous + frequency >= now => previous + frequency,
						_ => now,
					};
					debug!("queuing backup {} for {next}", target.name);
					if enqueue_if_needed(&self.db, &target, next).await?.is_some() {
						scheduled += 1;
					}
				}
				Err(reason) => {
					info!("cannot backup {}: {reason}", target.name);
					for job in enqueued_jobs(&self.db, target.id).await? {
						fail_job(&self.db, job, JobStatus::Failed, "Cannot queue job").await?;
					}
				}
			}
		}

		Ok(scheduled)
	}

	/// Claims all due `Scheduled` jobs for this run: `Pending` + runner id.
	async fn claim_due_jobs(&self, runner_id: Uuid) -> Result<Vec<backup_job::Model>, DbErr> {
		let due = backup_job::Entity::find()
			.filter(backup_job::Column::Status.eq(JobStatus::Scheduled.to_string()))
			.filter(backup_job::Column::RunnerId.is_null())
			.filter(backup_job::Column::Scheduled.lte(Utc::now()))
			.all(&self.db)
			.await?;

		let mut claimed = Vec::with_capacity(due.len());
		for job in due {
			let mut active: backup_job::ActiveModel = job.into();
			active.status = Set(JobStatus::Pending.to_string());
			active.runner_id = Set(Some(runner_id));
			claimed.push(active.update(&self.db).await?);
		}
		Ok(claimed)
	}

	/// One full scheduler activation.
	pub async fn run_once(&mut self, scope: &BackupScope) -> anyhow::Result<RunStats> {
		let runner_id = Uuid::new_v4();
		info!("scheduler run {runner_id} starting");

		let mut stats = RunStats {
			clean: self.clean_stale_jobs().await?,
			..Default::default()
		};
		stats.scheduled = self.schedule_jobs(scope).await?;

		let due = self.claim_due_jobs(runner_id).await?;
		stats.forked = due.len();
		for job in due {
			self.supervisor.fork(job).await?;
		}

		let mut sigterm = signal(SignalKind::terminate())?;
		let mut sigint = signal(SignalKind::interrupt())?;

		loop {
			self.supervisor.reap().await?;
			self.supervisor.handle_stuck_jobs().await?;
			if self.supervisor.is_empty() {
				break;
			}
			tokio::select! {
				_ = tokio::time::sleep(Duration::from_secs(1)) => {}
				_ = sigterm.recv() => {
					self.supervisor.drain("SIGTERM").await?;
					stats.drained = Some("SIGTERM");
					break;
				}
				_ = sigint.recv() => {
					self.supervisor.drain("SIGINT").await?;
					stats.drained = Some("SIGINT");
					break;
				}
			}
		}

		info!(
			"scheduler run {runner_id} finished: {} hung, {} missed, {} scheduled, {} forked",
			stats.clean.hung, stats.clean.missed, stats.scheduled, stats.forked
		);
		Ok(stats)
	}

	/// Daemon mode: repeated activations at the configured interval.
	/// Unexpected errors propagate out; the outer process supervisor is
	/// expected to restart the loop.
	pub async fn run_loop(&mut self, scope: &BackupScope) -> anyhow::Result<()> {
		let interval = Duration::from_secs(self.settings.schedule_interval);
		let mut sigterm = signal(SignalKind::terminate())?;
		let mut sigint = signal(SignalKind::interrupt())?;

		loop {
			let stats = self.run_once(scope).await?;
			if let Some(signal_name) = stats.drained {
				info!("exiting after {signal_name}");
				return Ok(());
			}
			tokio::select! {
				_ = tokio::time::sleep(interval) => {}
				_ = sigterm.recv() => {
					info!("exiting: SIGTERM");
					return Ok(());
				}
				_ = sigint.recv() => {
					info!("exiting: SIGINT");
					return Ok(());
				}
			}
		}
	}
}
