//! Commit entity
//!
//! One row per store revision. The sha is unique: a duplicate insert means
//! the index and the store have diverged and is surfaced as a hard error,
//! never silently absorbed.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "backup_commits")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,

	#[sea_orm(unique)]
	pub sha: String,

	/// Commit time, normalized to UTC.
	pub time: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(has_many = "super::backup_change::Entity")]
	Changes,
}

impl Related<super::backup_change::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Changes.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
