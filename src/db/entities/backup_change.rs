//! Change record entity
//!
//! Links a commit to the (old object, new object) pair for one stored file.
//! Uniqueness key is (file_id, commit_id, change_type): a commit touches a
//! file at most once, so re-indexing the same store event is a no-op.
//! "Previous version" is derived by commit-time ordering, not stored, so
//! reprocessing history never cascades updates.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::store::ChangeKind;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "backup_changes")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,

	pub backup_id: i32,
	pub file_id: i32,
	pub commit_id: i32,

	pub change_type: String, // ChangeKind as string

	/// Null ⇒ first version of the file.
	pub old_object_id: Option<i32>,
	pub new_object_id: Option<i32>,
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
	#[sea_orm(
		belongs_to = "super::backup_file::Entity",
		from = "Column::FileId",
		to = "super::backup_file::Column::Id",
		on_delete = "Cascade"
	)]
	File,
	#[sea_orm(
		belongs_to = "super::backup_commit::Entity",
		from = "Column::CommitId",
		to = "super::backup_commit::Column::Id",
		on_delete = "Restrict"
	)]
	Commit,
	#[sea_orm(
		belongs_to = "super::backup_object::Entity",
		from = "Column::OldObjectId",
		to = "super::backup_object::Column::Id",
		on_delete = "Restrict"
	)]
	OldObject,
	#[sea_orm(
		belongs_to = "super::backup_object::Entity",
		from = "Column::NewObjectId",
		to = "super::backup_object::Column::Id",
		on_delete = "Restrict"
	)]
	NewObject,
}

impl Related<super::backup::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Backup.def()
	}
}

impl Related<super::backup_commit::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Commit.def()
	}
}

impl Related<super::backup_file::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::File.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
	pub fn change_kind(&self) -> ChangeKind {
		match self.change_type.as_str() {
			"add" => ChangeKind::Add,
			_ => ChangeKind::Modify,
		}
	}
}
