#![allow(dead_code)]

use std::path::Path;

use chrono::{DateTime, Utc};
use sea_orm::ActiveModelTrait;

use configvault::backups;
use configvault::config::{FetchSettings, Settings};
use configvault::db::entities::{backup, backup_job};
use configvault::db::Database;
use configvault::inventory::{DeviceInfo, DeviceStatus, FileInventory, Platform};

pub fn test_settings(dir: &Path) -> Settings {
	Settings {
		repository: dir.join("repo"),
		database: dir.join("backups.sqlite"),
		committer: "Test Committer <committer@example.net>".to_string(),
		author: Some("Test Author <author@example.net>".to_string()),
		frequency: 3600,
		schedule_interval: 900,
		inventory: dir.join("devices.toml"),
		fetch: FetchSettings::default(),
	}
}

pub async fn open_db(settings: &Settings) -> Database {
	let db = Database::open(&settings.database).await.unwrap();
	db.migrate().await.unwrap();
	db
}

pub fn device(name: &str) -> DeviceInfo {
	DeviceInfo {
		name: name.to_string(),
		status: DeviceStatus::Active,
		platform: Some(Platform {
			driver: "ios".to_string(),
			args: Vec::new(),
		}),
		primary_ip: Some("192.0.2.1".to_string()),
	}
}

pub fn inventory_with(name: &str) -> FileInventory {
	FileInventory::from_devices(vec![device(name)])
}

pub async fn create_target(db: &Database, name: &str) -> backup::Model {
	backups::create_backup(db.conn(), name, Some(name.to_string()), None)
		.await
		.unwrap()
}

pub async fn scheduled_job(
	db: &Database,
	backup_id: i32,
	scheduled: DateTime<Utc>,
) -> backup_job::Model {
	backup_job::Model::new_scheduled(backup_id, scheduled)
		.insert(db.conn())
		.await
		.unwrap()
}
