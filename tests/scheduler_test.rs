//! Scheduler housekeeping and supervision: hung/missed reclamation, the
//! at-most-one-in-flight invariant, eligibility-driven cancellation, and
//! process reap/stuck/drain reconciliation.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};

use configvault::backups::{self, enqueue_if_needed};
use configvault::db::entities::backup_job::{self, JobStatus};
use configvault::db::Database;
use configvault::inventory::FileInventory;
use configvault::jobs::supervisor::{ProcessSupervisor, WorkerSpawner};
use configvault::jobs::{BackupRunner, BackupScope};

fn runner(db: &Database, inventory: FileInventory, dir: &std::path::Path) -> BackupRunner {
	let settings = helpers::test_settings(dir);
	BackupRunner::new(
		db.conn().clone(),
		Arc::new(inventory),
		WorkerSpawner::new("true", Vec::new()),
		settings,
	)
}

async fn job_by_id(db: &Database, id: i32) -> backup_job::Model {
	backup_job::Entity::find_by_id(id)
		.one(db.conn())
		.await
		.unwrap()
		.unwrap()
}

async fn non_terminal_count(db: &Database, backup_id: i32) -> u64 {
	backup_job::Entity::find()
		.filter(backup_job::Column::BackupId.eq(backup_id))
		.filter(
			backup_job::Column::Status.is_not_in(JobStatus::TERMINAL.map(|s| s.to_string())),
		)
		.count(db.conn())
		.await
		.unwrap()
}

#[tokio::test]
async fn schedule_jobs_creates_exactly_one_job() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let db = helpers::open_db(&settings).await;
	let target = helpers::create_target(&db, "sw1").await;
	let runner = runner(&db, helpers::inventory_with("sw1"), dir.path());

	assert_eq!(runner.schedule_jobs(&BackupScope::All).await.unwrap(), 1);
	// Already enqueued: nothing new.
	assert_eq!(runner.schedule_jobs(&BackupScope::All).await.unwrap(), 0);

	assert_eq!(non_terminal_count(&db, target.id).await, 1);
}

#[tokio::test]
async fn ineligible_target_never_gets_a_job_and_loses_enqueued_ones() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let db = helpers::open_db(&settings).await;
	// Device name points nowhere in the inventory.
	let target = helpers::create_target(&db, "ghost").await;
	let stale = helpers::scheduled_job(&db, target.id, Utc::now()).await;
	let runner = runner(&db, FileInventory::from_devices(Vec::new()), dir.path());

	assert_eq!(runner.schedule_jobs(&BackupScope::All).await.unwrap(), 0);

	let stale = job_by_id(&db, stale.id).await;
	assert_eq!(stale.job_status(), JobStatus::Failed);
	assert_eq!(stale.error().as_deref(), Some("Cannot queue job"));
	assert_eq!(non_terminal_count(&db, target.id).await, 0);
}

#[tokio::test]
async fn clean_stale_fails_hung_jobs() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let db = helpers::open_db(&settings).await;
	let target = helpers::create_target(&db, "sw1").await;
	let hung =
		helpers::scheduled_job(&db, target.id, Utc::now() - chrono::Duration::minutes(31)).await;
	let fresh = helpers::scheduled_job(&db, target.id, Utc::now()).await;
	let runner = runner(&db, helpers::inventory_with("sw1"), dir.path());

	let stats = runner.clean_stale_jobs().await.unwrap();
	assert_eq!(stats.hung, 1);

	let hung = job_by_id(&db, hung.id).await;
	assert_eq!(hung.job_status(), JobStatus::Failed);
	assert_eq!(hung.error().as_deref(), Some("Job hung"));

	let fresh = job_by_id(&db, fresh.id).await;
	assert_eq!(fresh.job_status(), JobStatus::Scheduled);
	assert_eq!(non_terminal_count(&db, target.id).await, 1);
}

#[tokio::test]
async fn clean_stale_keeps_only_latest_scheduled_duplicate() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let db = helpers::open_db(&settings).await;
	let target = helpers::create_target(&db, "sw1").await;
	// Simulated race: two enqueued jobs for one entity.
	let older =
		helpers::scheduled_job(&db, target.id, Utc::now() - chrono::Duration::minutes(5)).await;
	let newer = helpers::scheduled_job(&db, target.id, Utc::now()).await;
	let runner = runner(&db, helpers::inventory_with("sw1"), dir.path());

	let stats = runner.clean_stale_jobs().await.unwrap();
	assert_eq!(stats.missed, 1);
	assert_eq!(stats.hung, 0);

	let older = job_by_id(&db, older.id).await;
	assert_eq!(older.job_status(), JobStatus::Failed);
	assert_eq!(older.error().as_deref(), Some("Job missed"));

	let newer = job_by_id(&db, newer.id).await;
	assert_eq!(newer.job_status(), JobStatus::Scheduled);
	assert_eq!(non_terminal_count(&db, target.id).await, 1);
}

#[tokio::test]
async fn enqueue_if_needed_is_a_noop_while_enqueued() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let db = helpers::open_db(&settings).await;
	let target = helpers::create_target(&db, "sw1").await;

	let first = enqueue_if_needed(db.conn(), &target, Utc::now()).await.unwrap();
	assert!(first.is_some());
	let second = enqueue_if_needed(db.conn(), &target, Utc::now()).await.unwrap();
	assert!(second.is_none());
	assert_eq!(non_terminal_count(&db, target.id).await, 1);
}

#[tokio::test]
async fn requeue_fails_open_jobs_and_queues_fresh() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let db = helpers::open_db(&settings).await;
	let target = helpers::create_target(&db, "sw1").await;
	let job = helpers::scheduled_job(&db, target.id, Utc::now()).await;
	let mut active: backup_job::ActiveModel = job.clone().into();
	active.status = Set(JobStatus::Running.to_string());
	active.update(db.conn()).await.unwrap();

	let fresh = backups::requeue(db.conn(), &target).await.unwrap();
	assert!(fresh.is_some());

	let old = job_by_id(&db, job.id).await;
	assert_eq!(old.job_status(), JobStatus::Failed);
	assert_eq!(old.error().as_deref(), Some("Requeued"));
	assert_eq!(non_terminal_count(&db, target.id).await, 1);
}

#[tokio::test]
async fn status_summary_reflects_job_history() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let db = helpers::open_db(&settings).await;
	let target = helpers::create_target(&db, "sw1").await;

	let done = helpers::scheduled_job(&db, target.id, Utc::now()).await;
	let completed_at = Utc::now();
	let mut active: backup_job::ActiveModel = done.into();
	active.status = Set(JobStatus::Completed.to_string());
	active.completed = Set(Some(completed_at));
	active.update(db.conn()).await.unwrap();

	let next = helpers::scheduled_job(&db, target.id, Utc::now() + chrono::Duration::hours(1)).await;

	let summary = backups::status_summary(db.conn(), &target).await.unwrap();
	assert_eq!(summary.job_status, None);
	let last_success = summary.last_success.expect("completed job recorded");
	assert!((last_success - completed_at).num_seconds().abs() < 1);
	assert_eq!(summary.next_attempt, next.scheduled);
	assert_eq!(summary.last_change, None);
	assert_eq!(summary.last_error, None);

	let mut active: backup_job::ActiveModel = job_by_id(&db, next.id).await.into();
	active.status = Set(JobStatus::Running.to_string());
	active.update(db.conn()).await.unwrap();
	let summary = backups::status_summary(db.conn(), &target).await.unwrap();
	assert_eq!(summary.job_status, Some(JobStatus::Running));
}

#[tokio::test]
async fn update_backup_never_touches_the_uuid() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let db = helpers::open_db(&settings).await;
	let target = helpers::create_target(&db, "sw1").await;
	let uuid = target.uuid;

	let updated = backups::update_backup(
		db.conn(),
		target,
		backups::BackupUpdate {
			name: Some("sw1-renamed".to_string()),
			device: Some(None),
			status: Some(configvault::db::entities::backup::BackupStatus::Disabled),
			..Default::default()
		},
	)
	.await
	.unwrap();

	assert_eq!(updated.name, "sw1-renamed");
	assert_eq!(updated.device, None);
	assert_eq!(updated.uuid, uuid);
	assert_eq!(
		updated.backup_status(),
		configvault::db::entities::backup::BackupStatus::Disabled
	);
}

#[tokio::test]
async fn deleting_a_target_cancels_its_work() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let db = helpers::open_db(&settings).await;
	let target = helpers::create_target(&db, "sw1").await;
	helpers::scheduled_job(&db, target.id, Utc::now()).await;

	backups::delete_backup(db.conn(), target.id).await.unwrap();

	assert_eq!(
		backup_job::Entity::find().count(db.conn()).await.unwrap(),
		0
	);
	assert_eq!(
		configvault::db::entities::backup::Entity::find()
			.count(db.conn())
			.await
			.unwrap(),
		0
	);
}

#[tokio::test]
async fn reap_errors_a_worker_that_died_mid_run() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let db = helpers::open_db(&settings).await;
	let target = helpers::create_target(&db, "sw1").await;
	let job = helpers::scheduled_job(&db, target.id, Utc::now()).await;

	// `true` exits immediately without ever touching the job row.
	let spawner = WorkerSpawner::new("true", Vec::new());
	let mut supervisor =
		ProcessSupervisor::new(db.conn().clone(), spawner, Duration::from_secs(3600));

	supervisor.fork(job.clone()).await.unwrap();
	for _ in 0..20 {
		supervisor.reap().await.unwrap();
		if supervisor.is_empty() {
			break;
		}
		tokio::time::sleep(Duration::from_millis(250)).await;
	}
	assert!(supervisor.is_empty());

	let job = job_by_id(&db, job.id).await;
	assert_eq!(job.job_status(), JobStatus::Errored);
	assert_eq!(
		job.error().as_deref(),
		Some("Process terminated for unknown reason")
	);
}

#[tokio::test]
async fn reap_leaves_finished_jobs_alone() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let db = helpers::open_db(&settings).await;
	let target = helpers::create_target(&db, "sw1").await;
	let job = helpers::scheduled_job(&db, target.id, Utc::now()).await;

	// Simulate a worker that completed before its process exited.
	let mut active: backup_job::ActiveModel = job.clone().into();
	active.status = Set(JobStatus::Completed.to_string());
	active.completed = Set(Some(Utc::now()));
	let job = active.update(db.conn()).await.unwrap();

	let spawner = WorkerSpawner::new("true", Vec::new());
	let mut supervisor =
		ProcessSupervisor::new(db.conn().clone(), spawner, Duration::from_secs(3600));
	supervisor.fork(job.clone()).await.unwrap();
	for _ in 0..20 {
		supervisor.reap().await.unwrap();
		if supervisor.is_empty() {
			break;
		}
		tokio::time::sleep(Duration::from_millis(250)).await;
	}

	let job = job_by_id(&db, job.id).await;
	assert_eq!(job.job_status(), JobStatus::Completed);
}

#[tokio::test]
async fn spawn_failure_marks_job_failed() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let db = helpers::open_db(&settings).await;
	let target = helpers::create_target(&db, "sw1").await;
	let job = helpers::scheduled_job(&db, target.id, Utc::now()).await;

	let spawner = WorkerSpawner::new("/nonexistent/configvault-worker", Vec::new());
	let mut supervisor =
		ProcessSupervisor::new(db.conn().clone(), spawner, Duration::from_secs(3600));
	supervisor.fork(job.clone()).await.unwrap();
	assert!(supervisor.is_empty());

	let job = job_by_id(&db, job.id).await;
	assert_eq!(job.job_status(), JobStatus::Failed);
	assert!(job.error().is_some());
}

#[tokio::test]
async fn drain_errors_tracked_jobs_with_signal_name() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let db = helpers::open_db(&settings).await;
	let target = helpers::create_target(&db, "sw1").await;
	let job = helpers::scheduled_job(&db, target.id, Utc::now()).await;

	// Long-lived child; the job id lands as a second sleep operand.
	let spawner = WorkerSpawner::new("sleep", vec!["300".to_string()]);
	let mut supervisor =
		ProcessSupervisor::new(db.conn().clone(), spawner, Duration::from_secs(3600));
	supervisor.fork(job.clone()).await.unwrap();
	assert!(!supervisor.is_empty());

	supervisor.drain("SIGTERM").await.unwrap();
	assert!(supervisor.is_empty());

	let job = job_by_id(&db, job.id).await;
	assert_eq!(job.job_status(), JobStatus::Errored);
	assert_eq!(job.error().as_deref(), Some("SIGTERM"));
}

#[tokio::test]
async fn stuck_running_job_is_terminated() {
	let dir = tempfile::tempdir().unwrap();
	let settings = helpers::test_settings(dir.path());
	let db = helpers::open_db(&settings).await;
	let target = helpers::create_target(&db, "sw1").await;
	let job = helpers::scheduled_job(&db, target.id, Utc::now()).await;

	// Started far past the frequency window.
	let mut active: backup_job::ActiveModel = job.clone().into();
	active.status = Set(JobStatus::Running.to_string());
	active.started = Set(Some(Utc::now() - chrono::Duration::seconds(7200)));
	let job = active.update(db.conn()).await.unwrap();

	let spawner = WorkerSpawner::new("sleep", vec!["300".to_string()]);
	let mut supervisor =
		ProcessSupervisor::new(db.conn().clone(), spawner, Duration::from_secs(3600));
	supervisor.fork(job.clone()).await.unwrap();

	supervisor.handle_stuck_jobs().await.unwrap();
	assert!(!supervisor.is_tracking(target.id));

	let job = job_by_id(&db, job.id).await;
	assert_eq!(job.job_status(), JobStatus::Errored);
	assert_eq!(job.error().as_deref(), Some("Process terminated"));
}
