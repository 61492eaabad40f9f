//! The `can_backup` eligibility predicate, consulted before every
//! scheduling decision. Checks short-circuit in order; the failing check is
//! reported so operators can diagnose why a target never gets backed up.

use crate::db::entities::backup::{self, BackupStatus};
use crate::inventory::{DeviceInfo, DeviceStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
	NoDevice,
	Disabled,
	DeviceStatus(DeviceStatus),
	NoAddress,
	NoPlatform,
	NoDriver,
}

impl std::fmt::Display for Ineligible {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::NoDevice => write!(f, "no device assigned"),
			Self::Disabled => write!(f, "backup disabled"),
			Self::DeviceStatus(status) => write!(f, "device status is {status}"),
			Self::NoAddress => write!(f, "no primary or override address"),
			Self::NoPlatform => write!(f, "platform not set"),
			Self::NoDriver => write!(f, "no remote-access driver configured"),
		}
	}
}

/// The address a worker should connect to: the explicit override wins over
/// the device primary address.
pub fn address(backup: &backup::Model, device: Option<&DeviceInfo>) -> Option<String> {
	backup
		.ip
		.clone()
		.or_else(|| device.and_then(|d| d.primary_ip.clone()))
}

pub fn can_backup(backup: &backup::Model, device: Option<&DeviceInfo>) -> Result<(), Ineligible> {
	let device = device.ok_or(Ineligible::NoDevice)?;
	if backup.device.is_none() {
		return Err(Ineligible::NoDevice);
	}
	if backup.backup_status() == BackupStatus::Disabled {
		return Err(Ineligible::Disabled);
	}
	if device.status.is_backup_excluded() {
		return Err(Ineligible::DeviceStatus(device.status));
	}
	if address(backup, Some(device)).is_none() {
		return Err(Ineligible::NoAddress);
	}
	match &device.platform {
		None => Err(Ineligible::NoPlatform),
		Some(platform) if platform.driver.trim().is_empty() => Err(Ineligible::NoDriver),
		Some(_) => Ok(()),
	}
}
