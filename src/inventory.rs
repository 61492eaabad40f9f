//! External collaborators: the device inventory and the configuration-fetch
//! capability.
//!
//! Both are traits; the inventory web application is expected to supply real
//! implementations. The file-backed inventory and the exec-based fetcher
//! ship as reference implementations so the binary operates end to end.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::config::FetchSettings;
use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
	Active,
	Offline,
	Failed,
	Inventory,
	Planned,
	Staged,
	Decommissioning,
}

impl std::fmt::Display for DeviceStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			Self::Active => "active",
			Self::Offline => "offline",
			Self::Failed => "failed",
			Self::Inventory => "inventory",
			Self::Planned => "planned",
			Self::Staged => "staged",
			Self::Decommissioning => "decommissioning",
		};
		f.write_str(s)
	}
}

impl DeviceStatus {
	/// Statuses for which backup is administratively pointless.
	pub fn is_backup_excluded(self) -> bool {
		matches!(
			self,
			Self::Offline | Self::Failed | Self::Inventory | Self::Planned
		)
	}
}

/// Remote-access capability descriptor of a platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
	pub driver: String,
	#[serde(default)]
	pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
	pub name: String,
	pub status: DeviceStatus,
	#[serde(default)]
	pub platform: Option<Platform>,
	#[serde(default)]
	pub primary_ip: Option<String>,
}

#[async_trait]
pub trait Inventory: Send + Sync {
	async fn device(&self, name: &str) -> Option<DeviceInfo>;
}

/// TOML-document-backed inventory, a stand-in for the real inventory
/// service.
pub struct FileInventory {
	devices: HashMap<String, DeviceInfo>,
}

#[derive(Deserialize)]
struct InventoryDocument {
	#[serde(default)]
	devices: Vec<DeviceInfo>,
}

impl FileInventory {
	pub fn load(path: &Path) -> anyhow::Result<Self> {
		let raw = std::fs::read_to_string(path)
			.map_err(|e| anyhow::anyhow!("cannot read inventory {}: {e}", path.display()))?;
		let document: InventoryDocument = toml::from_str(&raw)?;
		Ok(Self::from_devices(document.devices))
	}

	pub fn from_devices(devices: Vec<DeviceInfo>) -> Self {
		Self {
			devices: devices.into_iter().map(|d| (d.name.clone(), d)).collect(),
		}
	}
}

#[async_trait]
impl Inventory for FileInventory {
	async fn device(&self, name: &str) -> Option<DeviceInfo> {
		self.devices.get(name).cloned()
	}
}

/// What one fetch attempt yields: both configuration texts plus the
/// device-reported metadata the relational model mirrors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchedConfig {
	#[serde(default)]
	pub running: String,
	#[serde(default)]
	pub startup: String,
	/// Device-reported "running config saved to startup" tri-state.
	#[serde(default)]
	pub config_saved: Option<bool>,
	#[serde(default)]
	pub running_changed: Option<DateTime<Utc>>,
	#[serde(default)]
	pub startup_changed: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ConfigFetcher: Send + Sync {
	async fn fetch(&self, device: &DeviceInfo, host: &str) -> Result<FetchedConfig, FetchError>;
}

/// Spawns the configured driver command and parses its JSON output.
///
/// Contract: exit 0 with a `FetchedConfig` JSON document on stdout; nonzero
/// exit with a one-line reason on stderr. A stderr mentioning
/// authentication maps to `FetchError::Auth`, anything else to `Connect`.
pub struct ExecFetcher {
	settings: FetchSettings,
}

impl ExecFetcher {
	pub fn new(settings: FetchSettings) -> Self {
		Self { settings }
	}

	fn command_line(&self, driver: &str, host: &str, extra: &[String]) -> Vec<String> {
		let args = extra.join(" ");
		self.settings
			.command
			.replace("{driver}", driver)
			.replace("{host}", host)
			.replace("{args}", &args)
			.split_whitespace()
			.map(str::to_string)
			.collect()
	}
}

#[async_trait]
impl ConfigFetcher for ExecFetcher {
	async fn fetch(&self, device: &DeviceInfo, host: &str) -> Result<FetchedConfig, FetchError> {
		let driver = device
			.platform
			.as_ref()
			.map(|p| p.driver.clone())
			.unwrap_or_default();
		let extra = device
			.platform
			.as_ref()
			.map(|p| p.args.clone())
			.unwrap_or_default();
		let argv = self.command_line(&driver, host, &extra);
		let (program, args) = argv.split_first().ok_or_else(|| FetchError::Driver {
			driver: driver.clone(),
			detail: "empty fetch command".to_string(),
		})?;

		debug!("fetching configuration from {host} via {program}");
		let mut command = Command::new(program);
		command
			.args(args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		let child = command.spawn().map_err(|e| FetchError::Driver {
			driver: driver.clone(),
			detail: e.to_string(),
		})?;

		let output = tokio::time::timeout(
			Duration::from_secs(self.settings.timeout),
			child.wait_with_output(),
		)
		.await
		.map_err(|_| FetchError::Timeout {
			host: host.to_string(),
		})?
		.map_err(|e| FetchError::Driver {
			driver: driver.clone(),
			detail: e.to_string(),
		})?;

		if !output.status.success() {
			let detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
			if detail.to_ascii_lowercase().contains("auth") {
				return Err(FetchError::Auth {
					host: host.to_string(),
				});
			}
			return Err(FetchError::Connect {
				host: host.to_string(),
				detail,
			});
		}

		serde_json::from_slice(&output.stdout).map_err(|e| FetchError::BadOutput(e.to_string()))
	}
}
