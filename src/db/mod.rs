//! Database infrastructure using SeaORM

use std::path::Path;
use std::time::Duration;

use sea_orm::{ConnectOptions, Database as SeaDatabase, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::info;

pub mod entities;
pub mod migration;

/// SQLite-backed database handle shared by the scheduler and workers; each
/// worker process opens its own.
pub struct Database {
	conn: DatabaseConnection,
}

impl Database {
	/// Opens the database at `path`, creating file and parent directories as
	/// needed.
	pub async fn open(path: &Path) -> Result<Self, DbErr> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)
				.map_err(|e| DbErr::Custom(format!("failed to create directory: {e}")))?;
		}

		let db_url = format!("sqlite://{}?mode=rwc", path.display());

		let mut opt = ConnectOptions::new(db_url);
		opt.max_connections(10)
			.min_connections(1)
			.connect_timeout(Duration::from_secs(8))
			.idle_timeout(Duration::from_secs(8))
			.sqlx_logging(false);

		let conn = SeaDatabase::connect(opt).await?;
		info!("opened database at {}", path.display());

		Ok(Self { conn })
	}

	/// Runs pending migrations.
	pub async fn migrate(&self) -> Result<(), DbErr> {
		migration::Migrator::up(&self.conn, None).await?;
		Ok(())
	}

	pub fn conn(&self) -> &DatabaseConnection {
		&self.conn
	}
}
