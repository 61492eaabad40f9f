//! Backup job entity
//!
//! One execution attempt for one backup target. The status machine is
//! Scheduled → Pending → Running → {Completed, Failed, Errored}; the first
//! two are collectively "enqueued". Rows are retained for audit after
//! completion, with excess terminal rows pruned by housekeeping.

use chrono::Utc;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
	Scheduled,
	Pending,
	Running,
	Completed,
	/// A recognized, expected precondition or connectivity failure. Routine.
	Failed,
	/// An unexpected failure. Escalated for operator attention.
	Errored,
}

impl JobStatus {
	pub const ENQUEUED: [JobStatus; 2] = [JobStatus::Scheduled, JobStatus::Pending];
	pub const TERMINAL: [JobStatus; 3] =
		[JobStatus::Completed, JobStatus::Failed, JobStatus::Errored];

	pub fn is_enqueued(self) -> bool {
		Self::ENQUEUED.contains(&self)
	}

	pub fn is_terminal(self) -> bool {
		Self::TERMINAL.contains(&self)
	}
}

impl std::fmt::Display for JobStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Scheduled => write!(f, "scheduled"),
			Self::Pending => write!(f, "pending"),
			Self::Running => write!(f, "running"),
			Self::Completed => write!(f, "completed"),
			Self::Failed => write!(f, "failed"),
			Self::Errored => write!(f, "errored"),
		}
	}
}

impl From<String> for JobStatus {
	fn from(s: String) -> Self {
		match s.as_str() {
			"scheduled" => Self::Scheduled,
			"pending" => Self::Pending,
			"running" => Self::Running,
			"completed" => Self::Completed,
			"failed" => Self::Failed,
			_ => Self::Errored,
		}
	}
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "backup_jobs")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,

	pub backup_id: i32,

	/// Scheduler run that claimed this job, once claimed.
	pub runner_id: Option<Uuid>,

	/// Worker OS process id, once the worker has started.
	pub pid: Option<i64>,

	pub created: DateTimeUtc,
	pub scheduled: Option<DateTimeUtc>,
	pub started: Option<DateTimeUtc>,
	pub completed: Option<DateTimeUtc>,

	pub status: String, // JobStatus as string

	/// Free-form result payload: `error` text and/or resulting `commit` sha.
	pub data: Option<Json>,

	/// External correlation id.
	#[sea_orm(unique)]
	pub job_id: Uuid,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(
		belongs_to = "super::backup::Entity",
		from = "Column::BackupId",
		to = "super::backup::Column::Id",
		on_delete = "Cascade"
	)]
	Backup,
}

impl Related<super::backup::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Backup.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
	/// Fresh `Scheduled` row for `backup_id` at `scheduled`.
	pub fn new_scheduled(backup_id: i32, scheduled: DateTimeUtc) -> ActiveModel {
		use sea_orm::Set;
		ActiveModel {
			backup_id: Set(backup_id),
			status: Set(JobStatus::Scheduled.to_string()),
			created: Set(Utc::now()),
			scheduled: Set(Some(scheduled)),
			data: Set(Some(serde_json::json!({}))),
			job_id: Set(Uuid::new_v4()),
			..Default::default()
		}
	}

	pub fn job_status(&self) -> JobStatus {
		JobStatus::from(self.status.clone())
	}

	pub fn error(&self) -> Option<String> {
		self.data
			.as_ref()
			.and_then(|d| d.get("error"))
			.and_then(|e| e.as_str())
			.map(str::to_string)
	}

	pub fn commit_sha(&self) -> Option<String> {
		self.data
			.as_ref()
			.and_then(|d| d.get("commit"))
			.and_then(|c| c.as_str())
			.filter(|c| !c.is_empty())
			.map(str::to_string)
	}

	pub fn duration(&self) -> Option<chrono::Duration> {
		match (self.started, self.completed) {
			(Some(started), Some(completed)) => Some(completed - started),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_classification() {
		assert!(JobStatus::Scheduled.is_enqueued());
		assert!(JobStatus::Pending.is_enqueued());
		assert!(!JobStatus::Running.is_enqueued());
		assert!(!JobStatus::Running.is_terminal());
		assert!(JobStatus::Completed.is_terminal());
		assert!(JobStatus::Failed.is_terminal());
		assert!(JobStatus::Errored.is_terminal());
	}

	#[test]
	fn status_string_roundtrip() {
		for status in [
			JobStatus::Scheduled,
			JobStatus::Pending,
			JobStatus::Running,
			JobStatus::Completed,
			JobStatus::Failed,
			JobStatus::Errored,
		] {
			assert_eq!(JobStatus::from(status.to_string()), status);
		}
	}

	#[test]
	fn payload_accessors() {
		let model = Model {
			id: 1,
			backup_id: 1,
			runner_id: None,
			pid: None,
			created: Utc::now(),
			scheduled: None,
			started: None,
			completed: None,
			status: JobStatus::Completed.to_string(),
			data: Some(serde_json::json!({"commit": "abc123", "error": "boom"})),
			job_id: Uuid::new_v4(),
		};
		assert_eq!(model.commit_sha().as_deref(), Some("abc123"));
		assert_eq!(model.error().as_deref(), Some("boom"));

		let empty = Model {
			data: Some(serde_json::json!({"commit": ""})),
			..model
		};
		assert_eq!(empty.commit_sha(), None);
	}
}
