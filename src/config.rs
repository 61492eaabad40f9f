//! Runtime settings, loaded from a TOML file.
//!
//! The frequency drives both the recurrence interval of successful backups
//! and the stuck-job timeout ceiling applied to started jobs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

fn default_frequency() -> u64 {
	3600
}

fn default_schedule_interval() -> u64 {
	900
}

fn default_fetch_timeout() -> u64 {
	60
}

fn default_committer() -> String {
	"configvault <configvault@localhost>".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
	/// Command template executed to fetch configuration from a device. The
	/// placeholders `{driver}`, `{host}` and `{args}` are substituted before
	/// spawning. Output must be a JSON document with `running`/`startup`
	/// keys and optional `config_saved`/`running_changed`/`startup_changed`.
	pub command: String,
	/// Per-attempt device I/O ceiling in seconds.
	#[serde(default = "default_fetch_timeout")]
	pub timeout: u64,
}

impl Default for FetchSettings {
	fn default() -> Self {
		Self {
			command: "configvault-fetch --driver {driver} --host {host} {args}".to_string(),
			timeout: default_fetch_timeout(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
	/// Location of the git repository holding configuration snapshots.
	pub repository: PathBuf,
	/// Location of the SQLite database file.
	pub database: PathBuf,
	/// Committer identity, "Name <email>".
	#[serde(default = "default_committer")]
	pub committer: String,
	/// Author identity, "Name <email>". Falls back to the committer.
	#[serde(default)]
	pub author: Option<String>,
	/// Backup recurrence in seconds. Also the stuck-job window.
	#[serde(default = "default_frequency")]
	pub frequency: u64,
	/// Scheduler activation interval in seconds for daemon mode.
	#[serde(default = "default_schedule_interval")]
	pub schedule_interval: u64,
	/// TOML inventory document describing devices.
	pub inventory: PathBuf,
	#[serde(default)]
	pub fetch: FetchSettings,
}

impl Settings {
	pub fn load(path: &Path) -> anyhow::Result<Self> {
		let raw = std::fs::read_to_string(path)
			.map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", path.display()))?;
		let settings = toml::from_str(&raw)?;
		Ok(settings)
	}

	/// Default config file location when `--config` is not given.
	pub fn default_path() -> PathBuf {
		ProjectDirs::from("", "", "configvault")
			.map(|dirs| dirs.config_dir().join("config.toml"))
			.unwrap_or_else(|| PathBuf::from("configvault.toml"))
	}

	pub fn frequency(&self) -> Duration {
		Duration::from_secs(self.frequency)
	}

	pub fn author(&self) -> &str {
		self.author.as_deref().unwrap_or(&self.committer)
	}

	/// Splits an identity string into (name, email). The email defaults to
	/// `configvault@localhost` when the identity carries none.
	pub fn identity(raw: &str) -> (String, String) {
		if let (Some(open), Some(close)) = (raw.find('<'), raw.rfind('>')) {
			if open < close {
				let name = raw[..open].trim();
				let email = raw[open + 1..close].trim();
				if !name.is_empty() && !email.is_empty() {
					return (name.to_string(), email.to_string());
				}
			}
		}
		(raw.trim().to_string(), "configvault@localhost".to_string())
	}
}
