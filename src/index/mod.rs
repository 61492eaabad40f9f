//! Relational index over the configuration store.
//!
//! Keeps "current version", "last change", and "diff against previous" as
//! simple lookups instead of history walks. The store is authoritative:
//! indexing always re-reads the log for the committed revision rather than
//! trusting locally computed diffs, and the whole index can be rebuilt from
//! the log after a divergence.

use sea_orm::{
	ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::entities::{backup, backup_change, backup_commit, backup_file, backup_object};
use crate::db::entities::backup::BackupStatus;
use crate::db::entities::backup_file::FileType;
use crate::error::IndexError;
use crate::store::{ChangeKind, Differ, GitStore, LogEntry, TreeChange};

/// Latest text of both tracked files for one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSet {
	pub running: String,
	pub startup: String,
}

impl ConfigSet {
	pub fn get(&self, kind: FileType) -> &str {
		match kind {
			FileType::Running => &self.running,
			FileType::Startup => &self.startup,
		}
	}

	pub fn set(&mut self, kind: FileType, value: String) {
		match kind {
			FileType::Running => self.running = value,
			FileType::Startup => self.startup = value,
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildStats {
	pub commits: usize,
	pub changes: usize,
	pub recovered: usize,
}

pub struct ChangeIndex<'a> {
	db: &'a DatabaseConnection,
	store: &'a GitStore,
	differ: Differ,
}

impl<'a> ChangeIndex<'a> {
	pub fn new(db: &'a DatabaseConnection, store: &'a GitStore) -> Self {
		Self {
			db,
			store,
			differ: Differ::new(),
		}
	}

	/// Latest stored content per kind, empty for a kind never written.
	pub fn get_config(&self, backup: &backup::Model) -> Result<ConfigSet, IndexError> {
		let mut configs = ConfigSet::default();
		for kind in FileType::ALL {
			let content = self.store.read(&backup.file_path(kind), None)?;
			configs.set(kind, content.unwrap_or_default());
		}
		Ok(configs)
	}

	/// Stores newly fetched configuration.
	///
	/// Returns `Ok(None)` when nothing differs from the last snapshot: the
	/// steady-state case, with no commit and no index mutation. Otherwise
	/// commits the changed kinds and indexes the new revision, returning its
	/// sha.
	pub async fn set_config(
		&self,
		backup: &backup::Model,
		device_label: &str,
		configs: &ConfigSet,
	) -> Result<Option<String>, IndexError> {
		let stored = self.get_config(backup)?;

		let mut changed = false;
		for kind in FileType::ALL {
			if self.differ.is_diff(stored.get(kind), configs.get(kind)) {
				debug!("{}: {kind} configuration changed", backup.name);
				self.store
					.write(&backup.file_path(kind), configs.get(kind))?;
				changed = true;
			}
		}
		if !changed {
			return Ok(None);
		}

		let message = format!("Backup of {device_label} for backup {}", backup.name);
		let sha = self.store.commit(&message)?;

		// The store is authoritative for what changed; re-read the log for
		// exactly this revision rather than trusting our own bookkeeping.
		let entry = self
			.store
			.log(&[], Some(&sha), Some(1))?
			.into_iter()
			.next()
			.ok_or_else(|| IndexError::MissingLogEntry(sha.clone()))?;

		if backup_commit::Entity::find()
			.filter(backup_commit::Column::Sha.eq(entry.sha.clone()))
			.one(self.db)
			.await?
			.is_some()
		{
			return Err(IndexError::DuplicateCommit(entry.sha));
		}
		let commit_row = backup_commit::ActiveModel {
			sha: Set(entry.sha.clone()),
			time: Set(entry.time),
			..Default::default()
		}
		.insert(self.db)
		.await?;
		info!("{}: committed {} at {}", backup.name, commit_row.sha, commit_row.time);

		for change in &entry.changes {
			let Some(parsed) = ParsedChange::from_tree_change(change) else {
				continue;
			};
			if parsed.uuid != backup.uuid {
				continue;
			}
			self.apply_change(backup, &commit_row, &parsed).await?;
		}

		Ok(Some(sha))
	}

	/// Reconstructs the index by replaying the full store log in
	/// chronological order. Idempotent: already-indexed commits and changes
	/// are no-ops. Entities found in history but missing from the database
	/// are recreated as placeholders named after their uuid.
	pub async fn rebuild(&self) -> Result<RebuildStats, IndexError> {
		let mut entries = self.store.log(&[], None, None)?;
		entries.reverse();

		let mut stats = RebuildStats::default();
		for entry in entries {
			let commit_row = self.get_or_create_commit(&entry).await?;
			for change in &entry.changes {
				let Some(parsed) = ParsedChange::from_tree_change(change) else {
					warn!("skipping unrecognized path in commit {}", entry.sha);
					continue;
				};
				let target = self.resolve_backup(parsed.uuid, &mut stats).await?;
				if self.apply_change(&target, &commit_row, &parsed).await? {
					stats.changes += 1;
				}
			}
			stats.commits += 1;
		}
		info!(
			"index rebuild complete: {} commits, {} changes, {} entities recovered",
			stats.commits, stats.changes, stats.recovered
		);
		Ok(stats)
	}

	/// The change immediately preceding `change` for the same file, by
	/// commit time. Derived, not stored, so replays never cascade updates.
	pub async fn previous_change(
		&self,
		change: &backup_change::Model,
	) -> Result<Option<backup_change::Model>, IndexError> {
		let commit = match backup_commit::Entity::find_by_id(change.commit_id)
			.one(self.db)
			.await?
		{
			Some(commit) => commit,
			None => return Ok(None),
		};

		let rows = backup_change::Entity::find()
			.find_also_related(backup_commit::Entity)
			.filter(backup_change::Column::BackupId.eq(change.backup_id))
			.filter(backup_change::Column::FileId.eq(change.file_id))
			.filter(backup_change::Column::Id.ne(change.id))
			.all(self.db)
			.await?;

		// Commit times have one-second resolution; break ties by row id.
		let mut prior: Vec<_> = rows
			.into_iter()
			.filter_map(|(row, commit_row)| commit_row.map(|c| (row, c)))
			.filter(|(row, c)| (c.time, row.id) < (commit.time, change.id))
			.collect();
		prior.sort_by_key(|(row, c)| (c.time, row.id));
		Ok(prior.pop().map(|(row, _)| row))
	}

	/// Mirrors a device-reported last-change time onto the stored file,
	/// creating the row on first contact.
	pub async fn record_last_change(
		&self,
		backup: &backup::Model,
		kind: FileType,
		time: chrono::DateTime<chrono::Utc>,
	) -> Result<(), IndexError> {
		let file = self.get_or_create_file(backup.id, kind).await?;
		if file.last_change == Some(time) {
			return Ok(());
		}
		let mut active: backup_file::ActiveModel = file.into();
		active.last_change = Set(Some(time));
		active.update(self.db).await?;
		Ok(())
	}

	async fn resolve_backup(
		&self,
		uuid: Uuid,
		stats: &mut RebuildStats,
	) -> Result<backup::Model, IndexError> {
		if let Some(found) = backup::Entity::find()
			.filter(backup::Column::Uuid.eq(uuid))
			.one(self.db)
			.await?
		{
			return Ok(found);
		}
		warn!("recovering entity {uuid} found in store history");
		stats.recovered += 1;
		let created = backup::ActiveModel {
			name: Set(uuid.to_string()),
			uuid: Set(uuid),
			status: Set(BackupStatus::Active.to_string()),
			..Default::default()
		}
		.insert(self.db)
		.await?;
		Ok(created)
	}

	async fn get_or_create_commit(
		&self,
		entry: &LogEntry,
	) -> Result<backup_commit::Model, IndexError> {
		if let Some(found) = backup_commit::Entity::find()
			.filter(backup_commit::Column::Sha.eq(entry.sha.clone()))
			.one(self.db)
			.await?
		{
			return Ok(found);
		}
		let created = backup_commit::ActiveModel {
			sha: Set(entry.sha.clone()),
			time: Set(entry.time),
			..Default::default()
		}
		.insert(self.db)
		.await?;
		Ok(created)
	}

	async fn get_or_create_object(&self, sha: &str) -> Result<backup_object::Model, IndexError> {
		if let Some(found) = backup_object::Entity::find()
			.filter(backup_object::Column::Sha.eq(sha))
			.one(self.db)
			.await?
		{
			return Ok(found);
		}
		let created = backup_object::ActiveModel {
			sha: Set(sha.to_string()),
			..Default::default()
		}
		.insert(self.db)
		.await?;
		Ok(created)
	}

	async fn get_or_create_file(
		&self,
		backup_id: i32,
		kind: FileType,
	) -> Result<backup_file::Model, IndexError> {
		if let Some(found) = backup_file::Entity::find()
			.filter(backup_file::Column::BackupId.eq(backup_id))
			.filter(backup_file::Column::FileType.eq(kind.as_str()))
			.one(self.db)
			.await?
		{
			return Ok(found);
		}
		let created = backup_file::ActiveModel {
			backup_id: Set(backup_id),
			file_type: Set(kind.as_str().to_string()),
			..Default::default()
		}
		.insert(self.db)
		.await?;
		Ok(created)
	}

	/// Get-or-create of one change row. Returns whether a row was created.
	async fn apply_change(
		&self,
		backup: &backup::Model,
		commit: &backup_commit::Model,
		parsed: &ParsedChange<'_>,
	) -> Result<bool, IndexError> {
		let old_object = match parsed.old_sha {
			Some(sha) => Some(self.get_or_create_object(sha).await?),
			None => None,
		};
		let new_object = match parsed.new_sha {
			Some(sha) => Some(self.get_or_create_object(sha).await?),
			None => None,
		};
		let file = self.get_or_create_file(backup.id, parsed.kind).await?;

		let exists = backup_change::Entity::find()
			.filter(backup_change::Column::FileId.eq(file.id))
			.filter(backup_change::Column::CommitId.eq(commit.id))
			.filter(backup_change::Column::ChangeType.eq(parsed.change_kind.as_str()))
			.one(self.db)
			.await?
			.is_some();
		if exists {
			return Ok(false);
		}

		backup_change::ActiveModel {
			backup_id: Set(backup.id),
			file_id: Set(file.id),
			commit_id: Set(commit.id),
			change_type: Set(parsed.change_kind.as_str().to_string()),
			old_object_id: Set(old_object.map(|o| o.id)),
			new_object_id: Set(new_object.map(|o| o.id)),
			..Default::default()
		}
		.insert(self.db)
		.await?;
		Ok(true)
	}
}

struct ParsedChange<'c> {
	uuid: Uuid,
	kind: FileType,
	change_kind: ChangeKind,
	old_sha: Option<&'c str>,
	new_sha: Option<&'c str>,
}

impl<'c> ParsedChange<'c> {
	fn from_tree_change(change: &'c TreeChange) -> Option<Self> {
		let path = change
			.new
			.as_ref()
			.or(change.old.as_ref())
			.map(|side| side.path.as_str())?;
		let (uuid, kind) = FileType::from_store_path(path)?;
		Some(Self {
			uuid,
			kind,
			change_kind: change.kind,
			old_sha: change.old.as_ref().map(|side| side.sha.as_str()),
			new_sha: change.new.as_ref().map(|side| side.sha.as_str()),
		})
	}
}
