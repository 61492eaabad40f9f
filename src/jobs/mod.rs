//! Job scheduling and execution: the periodic control loop, the per-job
//! worker processes, and the supervision that reconciles the two.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, Set};

use crate::db::entities::backup_job::{self, JobStatus};

pub mod eligibility;
pub mod scheduler;
pub mod supervisor;
pub mod worker;

pub use scheduler::{BackupRunner, BackupScope};
pub use supervisor::{ProcessSupervisor, WorkerSpawner};

/// Moves a job to `status`, merging `error` into its result payload.
/// Terminal statuses also stamp the completion time.
pub async fn fail_job(
	db: &DatabaseConnection,
	job: backup_job::Model,
	status: JobStatus,
	error: &str,
) -> Result<backup_job::Model, DbErr> {
	let mut data = job.data.clone().unwrap_or_else(|| serde_json::json!({}));
	if let Some(map) = data.as_object_mut() {
		map.insert(
			"error".to_string(),
			serde_json::Value::String(error.to_string()),
		);
	}

	let mut active: backup_job::ActiveModel = job.into();
	active.status = Set(status.to_string());
	active.data = Set(Some(data));
	if status.is_terminal() {
		active.completed = Set(Some(Utc::now()));
	}
	active.update(db).await
}
