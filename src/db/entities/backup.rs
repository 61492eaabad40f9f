//! Backup target entity
//!
//! One configuration-backup subscription for a device (or a standalone
//! address). The `uuid` is assigned at creation and never changes: it is the
//! stem of the entity's two file paths in the store, so renaming the entity
//! cannot orphan its history.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::backup_file::FileType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupStatus {
	Active,
	Disabled,
}

impl std::fmt::Display for BackupStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Active => write!(f, "active"),
			Self::Disabled => write!(f, "disabled"),
		}
	}
}

impl From<String> for BackupStatus {
	fn from(s: String) -> Self {
		match s.as_str() {
			"disabled" => Self::Disabled,
			_ => Self::Active,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "backups")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,

	#[sea_orm(unique)]
	pub name: String,

	/// Immutable content-addressing stem for the store paths.
	#[sea_orm(unique)]
	pub uuid: Uuid,

	pub status: String, // BackupStatus as string

	/// Key of the backing device in the external inventory.
	pub device: Option<String>,

	/// Explicit address override; the device primary address otherwise.
	pub ip: Option<String>,

	/// Device-reported "running config persisted to startup" tri-state.
	pub config_saved: Option<bool>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(has_many = "super::backup_file::Entity")]
	Files,
	#[sea_orm(has_many = "super::backup_job::Entity")]
	Jobs,
	#[sea_orm(has_many = "super::backup_change::Entity")]
	Changes,
}

impl Related<super::backup_file::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Files.def()
	}
}

impl Related<super::backup_job::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Jobs.def()
	}
}

impl Related<super::backup_change::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Changes.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
	pub fn backup_status(&self) -> BackupStatus {
		BackupStatus::from(self.status.clone())
	}

	/// Store path of one of this entity's files, `{uuid}.{kind}`. A durable
	/// contract: changing this naming orphans history.
	pub fn file_path(&self, kind: FileType) -> String {
		format!("{}.{}", self.uuid, kind)
	}

	pub fn file_paths(&self) -> [String; 2] {
		[
			self.file_path(FileType::Running),
			self.file_path(FileType::Startup),
		]
	}
}
