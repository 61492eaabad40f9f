//! Initial schema: backup targets, stored files, the commit/object/change
//! index, and the job table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(Backups::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Backups::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(Backups::Name).string().not_null().unique_key())
					.col(ColumnDef::new(Backups::Uuid).uuid().not_null().unique_key())
					.col(ColumnDef::new(Backups::Status).string().not_null())
					.col(ColumnDef::new(Backups::Device).string())
					.col(ColumnDef::new(Backups::Ip).string())
					.col(ColumnDef::new(Backups::ConfigSaved).boolean())
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(BackupFiles::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(BackupFiles::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(BackupFiles::BackupId).integer().not_null())
					.col(ColumnDef::new(BackupFiles::FileType).string().not_null())
					.col(ColumnDef::new(BackupFiles::LastChange).timestamp_with_time_zone())
					.foreign_key(
						ForeignKey::create()
							.from(BackupFiles::Table, BackupFiles::BackupId)
							.to(Backups::Table, Backups::Id)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_backup_files_backup_type")
					.table(BackupFiles::Table)
					.col(BackupFiles::BackupId)
					.col(BackupFiles::FileType)
					.unique()
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(BackupCommits::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(BackupCommits::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(
						ColumnDef::new(BackupCommits::Sha)
							.string()
							.not_null()
							.unique_key(),
					)
					.col(
						ColumnDef::new(BackupCommits::Time)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(BackupObjects::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(BackupObjects::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(
						ColumnDef::new(BackupObjects::Sha)
							.string()
							.not_null()
							.unique_key(),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(BackupChanges::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(BackupChanges::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(BackupChanges::BackupId).integer().not_null())
					.col(ColumnDef::new(BackupChanges::FileId).integer().not_null())
					.col(ColumnDef::new(BackupChanges::CommitId).integer().not_null())
					.col(ColumnDef::new(BackupChanges::ChangeType).string().not_null())
					.col(ColumnDef::new(BackupChanges::OldObjectId).integer())
					.col(ColumnDef::new(BackupChanges::NewObjectId).integer())
					.foreign_key(
						ForeignKey::create()
							.from(BackupChanges::Table, BackupChanges::BackupId)
							.to(Backups::Table, Backups::Id)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.foreign_key(
						ForeignKey::create()
							.from(BackupChanges::Table, BackupChanges::FileId)
							.to(BackupFiles::Table, BackupFiles::Id)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.foreign_key(
						ForeignKey::create()
							.from(BackupChanges::Table, BackupChanges::CommitId)
							.to(BackupCommits::Table, BackupCommits::Id)
							.on_delete(ForeignKeyAction::Restrict),
					)
					.foreign_key(
						ForeignKey::create()
							.from(BackupChanges::Table, BackupChanges::OldObjectId)
							.to(BackupObjects::Table, BackupObjects::Id)
							.on_delete(ForeignKeyAction::Restrict),
					)
					.foreign_key(
						ForeignKey::create()
							.from(BackupChanges::Table, BackupChanges::NewObjectId)
							.to(BackupObjects::Table, BackupObjects::Id)
							.on_delete(ForeignKeyAction::Restrict),
					)
					.to_owned(),
			)
			.await?;

		// One change per file per commit; re-indexing is idempotent.
		manager
			.create_index(
				Index::create()
					.name("idx_backup_changes_file_commit")
					.table(BackupChanges::Table)
					.col(BackupChanges::FileId)
					.col(BackupChanges::CommitId)
					.col(BackupChanges::ChangeType)
					.unique()
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_backup_changes_backup_id")
					.table(BackupChanges::Table)
					.col(BackupChanges::BackupId)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(BackupJobs::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(BackupJobs::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(BackupJobs::BackupId).integer().not_null())
					.col(ColumnDef::new(BackupJobs::RunnerId).uuid())
					.col(ColumnDef::new(BackupJobs::Pid).big_integer())
					.col(
						ColumnDef::new(BackupJobs::Created)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.col(ColumnDef::new(BackupJobs::Scheduled).timestamp_with_time_zone())
					.col(ColumnDef::new(BackupJobs::Started).timestamp_with_time_zone())
					.col(ColumnDef::new(BackupJobs::Completed).timestamp_with_time_zone())
					.col(ColumnDef::new(BackupJobs::Status).string().not_null())
					.col(ColumnDef::new(BackupJobs::Data).json())
					.col(ColumnDef::new(BackupJobs::JobId).uuid().not_null().unique_key())
					.foreign_key(
						ForeignKey::create()
							.from(BackupJobs::Table, BackupJobs::BackupId)
							.to(Backups::Table, Backups::Id)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_backup_jobs_backup_status")
					.table(BackupJobs::Table)
					.col(BackupJobs::BackupId)
					.col(BackupJobs::Status)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_backup_jobs_status_scheduled")
					.table(BackupJobs::Table)
					.col(BackupJobs::Status)
					.col(BackupJobs::Scheduled)
					.to_owned(),
			)
			.await?;

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.drop_table(Table::drop().table(BackupJobs::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(BackupChanges::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(BackupObjects::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(BackupCommits::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(BackupFiles::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Backups::Table).to_owned())
			.await?;
		Ok(())
	}
}

#[derive(DeriveIden)]
enum Backups {
	Table,
	Id,
	Name,
	Uuid,
	Status,
	Device,
	Ip,
	ConfigSaved,
}

#[derive(DeriveIden)]
enum BackupFiles {
	Table,
	Id,
	BackupId,
	FileType,
	LastChange,
}

#[derive(DeriveIden)]
enum BackupCommits {
	Table,
	Id,
	Sha,
	Time,
}

#[derive(DeriveIden)]
enum BackupObjects {
	Table,
	Id,
	Sha,
}

#[derive(DeriveIden)]
enum BackupChanges {
	Table,
	Id,
	BackupId,
	FileId,
	CommitId,
	ChangeType,
	OldObjectId,
	NewObjectId,
}

#[derive(DeriveIden)]
enum BackupJobs {
	Table,
	Id,
	BackupId,
	RunnerId,
	Pid,
	Created,
	Scheduled,
	Started,
	Completed,
	Status,
	Data,
	JobId,
}
