//! Entity lifecycle and status queries exposed to the UI/API collaborator:
//! CRUD with job cancellation, enqueue-if-needed, and the per-entity
//! summary (current job state, last success, next attempt, last change).

use chrono::{DateTime, Utc};
use sea_orm::{
	ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
	QueryOrder, QuerySelect, Set,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::entities::backup::{self, BackupStatus};
use crate::db::entities::backup_job::{self, JobStatus};
use crate::db::entities::{backup_change, backup_commit, backup_file};
use crate::jobs::fail_job;

/// Terminal job rows kept per entity for audit; older ones are pruned.
pub const JOB_HISTORY_KEEP: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSummary {
	/// `Pending`/`Running` when a job is currently in flight.
	pub job_status: Option<JobStatus>,
	pub next_attempt: Option<DateTime<Utc>>,
	pub last_success: Option<DateTime<Utc>>,
	pub last_change: Option<DateTime<Utc>>,
	pub last_error: Option<String>,
}

pub async fn create_backup(
	db: &DatabaseConnection,
	name: &str,
	device: Option<String>,
	ip: Option<String>,
) -> Result<backup::Model, DbErr> {
	backup::ActiveModel {
		name: Set(name.to_string()),
		uuid: Set(Uuid::new_v4()),
		status: Set(BackupStatus::Active.to_string()),
		device: Set(device),
		ip: Set(ip),
		..Default::default()
	}
	.insert(db)
	.await
}

/// Field updates for an entity. `None` leaves a field untouched; the uuid
/// is immutable and cannot be updated.
#[derive(Debug, Clone, Default)]
pub struct BackupUpdate {
	pub name: Option<String>,
	pub device: Option<Option<String>>,
	pub ip: Option<Option<String>>,
	pub status: Option<BackupStatus>,
}

pub async fn update_backup(
	db: &DatabaseConnection,
	backup: backup::Model,
	update: BackupUpdate,
) -> Result<backup::Model, DbErr> {
	let mut active: backup::ActiveModel = backup.into();
	if let Some(name) = update.name {
		active.name = Set(name);
	}
	if let Some(device) = update.device {
		active.device = Set(device);
	}
	if let Some(ip) = update.ip {
		active.ip = Set(ip);
	}
	if let Some(status) = update.status {
		active.status = Set(status.to_string());
	}
	active.update(db).await
}

/// Deletes an entity. Outstanding enqueued work is cancelled first; store
/// commits and objects are append-only and survive.
pub async fn delete_backup(db: &DatabaseConnection, id: i32) -> Result<(), DbErr> {
	for job in enqueued_jobs(db, id).await? {
		warn!("cancelling job {} for deleted backup {id}", job.id);
		fail_job(db, job, JobStatus::Failed, "Backup deleted").await?;
	}
	backup_job::Entity::delete_many()
		.filter(backup_job::Column::BackupId.eq(id))
		.exec(db)
		.await?;
	backup_change::Entity::delete_many()
		.filter(backup_change::Column::BackupId.eq(id))
		.exec(db)
		.await?;
	backup_file::Entity::delete_many()
		.filter(backup_file::Column::BackupId.eq(id))
		.exec(db)
		.await?;
	backup::Entity::delete_by_id(id).exec(db).await?;
	Ok(())
}

pub async fn enqueued_jobs(
	db: &DatabaseConnection,
	backup_id: i32,
) -> Result<Vec<backup_job::Model>, DbErr> {
	backup_job::Entity::find()
		.filter(backup_job::Column::BackupId.eq(backup_id))
		.filter(
			backup_job::Column::Status
				.is_in(JobStatus::ENQUEUED.map(|s| s.to_string())),
		)
		.order_by_asc(backup_job::Column::Scheduled)
		.all(db)
		.await
}

pub async fn needs_enqueue(db: &DatabaseConnection, backup_id: i32) -> Result<bool, DbErr> {
	Ok(enqueued_jobs(db, backup_id).await?.is_empty())
}

/// Creates a `Scheduled` job at `scheduled` unless one is already enqueued.
pub async fn enqueue_if_needed(
	db: &DatabaseConnection,
	backup: &backup::Model,
	scheduled: DateTime<Utc>,
) -> Result<Option<backup_job::Model>, DbErr> {
	if !needs_enqueue(db, backup.id).await? {
		return Ok(None);
	}
	let job = backup_job::Model::new_scheduled(backup.id, scheduled)
		.insert(db)
		.await?;
	info!("queued backup {} for {}", backup.name, scheduled);
	Ok(Some(job))
}

/// Force-fails all non-terminal jobs, then queues a fresh attempt.
pub async fn requeue(
	db: &DatabaseConnection,
	backup: &backup::Model,
) -> Result<Option<backup_job::Model>, DbErr> {
	let open = backup_job::Entity::find()
		.filter(backup_job::Column::BackupId.eq(backup.id))
		.filter(
			backup_job::Column::Status
				.is_not_in(JobStatus::TERMINAL.map(|s| s.to_string())),
		)
		.all(db)
		.await?;
	for job in open {
		fail_job(db, job, JobStatus::Failed, "Requeued").await?;
	}
	enqueue_if_needed(db, backup, Utc::now()).await
}

/// Drops terminal job rows beyond the newest [`JOB_HISTORY_KEEP`].
pub async fn prune_terminal_jobs(
	db: &DatabaseConnection,
	backup_id: i32,
) -> Result<usize, DbErr> {
	let terminal = backup_job::Entity::find()
		.filter(backup_job::Column::BackupId.eq(backup_id))
		.filter(
			backup_job::Column::Status
				.is_in(JobStatus::TERMINAL.map(|s| s.to_string())),
		)
		.order_by_desc(backup_job::Column::Created)
		.all(db)
		.await?;
	let excess: Vec<i32> = terminal
		.into_iter()
		.skip(JOB_HISTORY_KEEP)
		.map(|job| job.id)
		.collect();
	if excess.is_empty() {
		return Ok(0);
	}
	let pruned = excess.len();
	backup_job::Entity::delete_many()
		.filter(backup_job::Column::Id.is_in(excess))
		.exec(db)
		.await?;
	Ok(pruned)
}

pub async fn find_backup(
	db: &DatabaseConnection,
	device_or_name: &str,
) -> Result<Option<backup::Model>, DbErr> {
	if let Some(found) = backup::Entity::find()
		.filter(backup::Column::Device.eq(device_or_name))
		.one(db)
		.await?
	{
		return Ok(Some(found));
	}
	backup::Entity::find()
		.filter(backup::Column::Name.eq(device_or_name))
		.one(db)
		.await
}

pub async fn list_backups(
	db: &DatabaseConnection,
	unassigned: bool,
) -> Result<Vec<backup::Model>, DbErr> {
	let query = backup::Entity::find().order_by_asc(backup::Column::Name);
	let query = if unassigned {
		query.filter(backup::Column::Device.is_null())
	} else {
		query.filter(backup::Column::Device.is_not_null())
	};
	query.all(db).await
}

/// The entity detail summary. Errors are surfaced as recorded text, never a
/// backtrace.
pub async fn status_summary(
	db: &DatabaseConnection,
	backup: &backup::Model,
) -> Result<StatusSummary, DbErr> {
	let jobs = backup_job::Entity::find()
		.filter(backup_job::Column::BackupId.eq(backup.id))
		.all(db)
		.await?;

	let job_status = if jobs
		.iter()
		.any(|j| j.job_status() == JobStatus::Running)
	{
		Some(JobStatus::Running)
	} else if jobs.iter().any(|j| j.job_status() == JobStatus::Pending) {
		Some(JobStatus::Pending)
	} else {
		None
	};

	let next_attempt = jobs
		.iter()
		.filter(|j| j.job_status().is_enqueued())
		.filter_map(|j| j.scheduled)
		.max();

	let last_success = jobs
		.iter()
		.filter(|j| j.job_status() == JobStatus::Completed)
		.filter_map(|j| j.completed)
		.max();

	let last_error = jobs
		.iter()
		.filter(|j| j.job_status().is_terminal() && j.completed.is_some())
		.max_by_key(|j| j.completed)
		.and_then(|j| j.error());

	let last_change = backup_change::Entity::find()
		.find_also_related(backup_commit::Entity)
		.filter(backup_change::Column::BackupId.eq(backup.id))
		.order_by_desc(backup_change::Column::Id)
		.limit(1)
		.all(db)
		.await?
		.into_iter()
		.next()
		.and_then(|(_, commit)| commit.map(|c| c.time));

	Ok(StatusSummary {
		job_status,
		next_attempt,
		last_success,
		last_change,
		last_error,
	})
}
