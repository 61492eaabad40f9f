//! Stored file entity
//!
//! Exactly one row per (backup, kind), created lazily on the first
//! successful fetch of that kind. `last_change` mirrors the device-reported
//! change time, which is independent of commit time.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
	Running,
	Startup,
}

impl FileType {
	pub const ALL: [FileType; 2] = [FileType::Running, FileType::Startup];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Running => "running",
			Self::Startup => "startup",
		}
	}

	/// Parses the `{uuid}.{kind}` store path convention.
	pub fn from_store_path(path: &str) -> Option<(Uuid, FileType)> {
		let (stem, kind) = path.rsplit_once('.')?;
		let uuid = Uuid::parse_str(stem).ok()?;
		match kind {
			"running" => Some((uuid, FileType::Running)),
			"startup" => Some((uuid, FileType::Startup)),
			_ => None,
		}
	}
}

impl std::fmt::Display for FileType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl From<String> for FileType {
	fn from(s: String) -> Self {
		match s.as_str() {
			"startup" => Self::Startup,
			_ => Self::Running,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "backup_files")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,

	pub backup_id: i32,

	pub file_type: String, // FileType as string

	/// Device-reported last configuration change, when known.
	pub last_change: Option<DateTimeUtc>,
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
	#[sea_orm(has_many = "super::backup_change::Entity")]
	Changes,
}

impl Related<super::backup::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Backup.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
	pub fn file_type(&self) -> FileType {
		FileType::from(self.file_type.clone())
	}
}
