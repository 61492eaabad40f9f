use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use sea_orm::{ActiveModelTrait, Set};
use tracing_subscriber::EnvFilter;

use configvault::backups::{self, enqueue_if_needed, needs_enqueue};
use configvault::config::Settings;
use configvault::db::entities::backup_job;
use configvault::db::Database;
use configvault::index::ChangeIndex;
use configvault::inventory::{ExecFetcher, FileInventory, Inventory};
use configvault::jobs::{worker, BackupRunner, BackupScope, WorkerSpawner};
use configvault::store::GitStore;

#[derive(Parser)]
#[command(name = "configvault", about = "Scheduled network configuration backup", version)]
struct Cli {
	/// Path to the configuration file.
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Run the backup scheduler.
	Run {
		/// Restrict scheduling to one device.
		#[arg(long)]
		device: Option<String>,
		/// Run a single scheduler activation instead of the daemon loop.
		#[arg(long)]
		once: bool,
	},
	/// Trigger an immediate backup for one device.
	Backup {
		#[arg(long)]
		device: String,
	},
	/// List backup targets with device and address.
	List {
		/// Show targets without an assigned device instead.
		#[arg(long)]
		unassigned: bool,
	},
	/// Queue backups for every target missing an enqueued job.
	Enqueue,
	/// Rebuild the change index from store history.
	Reindex,
	/// Execute one backup job. Spawned by the scheduler.
	#[command(hide = true)]
	Worker {
		#[arg(long)]
		job: i32,
	},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let cli = Cli::parse();
	let config_path = cli.config.unwrap_or_else(Settings::default_path);
	let settings = Settings::load(&config_path)?;

	match cli.command {
		Commands::Run { device, once } => run(settings, &config_path, device, once).await,
		Commands::Backup { device } => backup_now(settings, &config_path, device).await,
		Commands::List { unassigned } => list(settings, unassigned).await,
		Commands::Enqueue => enqueue(settings).await,
		Commands::Reindex => reindex(settings).await,
		Commands::Worker { job } => worker_entry(settings, job).await,
	}
}

async fn open_database(settings: &Settings) -> anyhow::Result<Database> {
	let db = Database::open(&settings.database).await?;
	db.migrate().await?;
	Ok(db)
}

fn load_inventory(settings: &Settings) -> anyhow::Result<Arc<FileInventory>> {
	Ok(Arc::new(FileInventory::load(&settings.inventory)?))
}

async fn run(
	settings: Settings,
	config_path: &std::path::Path,
	device: Option<String>,
	once: bool,
) -> anyhow::Result<()> {
	let db = open_database(&settings).await?;
	let inventory = load_inventory(&settings)?;
	let spawner =
		WorkerSpawner::current_exe(config_path).context("cannot locate worker executable")?;
	let scope = match device {
		Some(device) => BackupScope::Device(device),
		None => BackupScope::All,
	};

	let mut runner = BackupRunner::new(db.conn().clone(), inventory, spawner, settings);
	if once {
		runner.run_once(&scope).await?;
		Ok(())
	} else {
		runner.run_loop(&scope).await
	}
}

async fn backup_now(
	settings: Settings,
	config_path: &std::path::Path,
	device: String,
) -> anyhow::Result<()> {
	let db = open_database(&settings).await?;
	let Some(target) = backups::find_backup(db.conn(), &device).await? else {
		bail!("Device not found");
	};
	println!("Running backup for: {device}");

	// Pull any enqueued job forward to now, or queue a fresh one.
	for job in backups::enqueued_jobs(db.conn(), target.id).await? {
		let mut active: backup_job::ActiveModel = job.into();
		active.scheduled = Set(Some(Utc::now()));
		active.update(db.conn()).await?;
	}
	enqueue_if_needed(db.conn(), &target, Utc::now()).await?;

	let inventory = load_inventory(&settings)?;
	let spawner =
		WorkerSpawner::current_exe(config_path).context("cannot locate worker executable")?;
	let mut runner = BackupRunner::new(db.conn().clone(), inventory, spawner, settings);
	runner.run_once(&BackupScope::Backup(target.id)).await?;
	Ok(())
}

async fn list(settings: Settings, unassigned: bool) -> anyhow::Result<()> {
	let db = open_database(&settings).await?;
	let inventory = load_inventory(&settings)?;

	println!("{:<24}{:<24}{}", "Backup Name", "Device Name", "IP");
	for target in backups::list_backups(db.conn(), unassigned).await? {
		let device = match &target.device {
			Some(name) => inventory.device(name).await,
			None => None,
		};
		let address = configvault::jobs::eligibility::address(&target, device.as_ref())
			.unwrap_or_default();
		println!(
			"{:<24}{:<24}{address}",
			target.name,
			target.device.as_deref().unwrap_or("-"),
		);
	}
	Ok(())
}

async fn enqueue(settings: Settings) -> anyhow::Result<()> {
	let db = open_database(&settings).await?;
	for target in backups::list_backups(db.conn(), false).await? {
		if needs_enqueue(db.conn(), target.id).await? {
			enqueue_if_needed(db.conn(), &target, Utc::now()).await?;
			println!("Backup: {} has been queued", target.name);
		}
	}
	Ok(())
}

async fn reindex(settings: Settings) -> anyhow::Result<()> {
	let db = open_database(&settings).await?;
	let store = GitStore::open(&settings)?;
	let index = ChangeIndex::new(db.conn(), &store);
	let stats = index.rebuild().await?;
	println!(
		"Reindexed {} commits: {} changes, {} entities recovered",
		stats.commits, stats.changes, stats.recovered
	);
	Ok(())
}

async fn worker_entry(settings: Settings, job: i32) -> anyhow::Result<()> {
	let inventory = load_inventory(&settings)?;
	let fetcher = ExecFetcher::new(settings.fetch.clone());
	worker::execute(&settings, inventory.as_ref(), &fetcher, job).await
}
