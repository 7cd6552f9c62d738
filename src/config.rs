//! Device inventory
//!
//! ```toml
//! [defaults]
//! user = "admin"
//! identity_file = "~/.ssh/routers"
//!
//! [[device]]
//! name = "core"
//! host = "192.0.2.1"
//! os = "v7"
//!
//! [[device]]
//! name = "branch"
//! host = "192.0.2.1"
//! romon_host_id = "00:11:22:33:44:55"
//! ```

use anyhow::{Context, Result, bail};
use routeros::OsGeneration;
use routeros::transport::SshTarget;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

/// Round-trip timeout when neither the device nor the defaults set one
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Inventory Schema
// ============================================================================

/// All known devices
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Inventory {
    /// Settings shared by every device
    #[serde(default)]
    pub defaults: DeviceDefaults,

    /// Devices, in file order
    #[serde(default, rename = "device")]
    pub devices: Vec<Device>,
}

/// Settings a device inherits unless it sets its own
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DeviceDefaults {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub identity_file: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// One device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub identity_file: Option<String>,
    /// Set when `host` is a RoMON agent and this device sits behind it
    #[serde(default)]
    pub romon_host_id: Option<String>,
    /// Firmware generation; detected on connect when absent
    #[serde(default)]
    pub os: Option<OsGeneration>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Device {
    /// ssh settings, with defaults filled in
    pub fn target(&self, defaults: &DeviceDefaults) -> SshTarget {
        let identity = self
            .identity_file
            .as_deref()
            .or(defaults.identity_file.as_deref());
        SshTarget {
            host: self.host.clone(),
            port: self.port.or(defaults.port),
            user: self.user.clone().or_else(|| defaults.user.clone()),
            identity_file: identity.map(paths::expand),
            romon_host_id: self.romon_host_id.clone(),
        }
    }

    /// Per-round-trip timeout
    pub fn timeout(&self, defaults: &DeviceDefaults) -> Duration {
        Duration::from_secs(
            self.timeout_secs
                .or(defaults.timeout_secs)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        )
    }
}

impl Inventory {
    /// Load an inventory file, TOML or JSON by extension
    pub fn load(path: &Path) -> Result<Self> {
        let inventory: Self = load_file(path)?;
        inventory
            .validate()
            .with_context(|| format!("Invalid inventory {}", path.display()))?;
        Ok(inventory)
    }

    /// Load from `--inventory`, or from the config directory
    pub fn load_default(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => paths::inventory_path()?,
        };
        if !path.exists() {
            bail!(
                "No inventory at {} (set {} or pass --inventory)",
                path.display(),
                paths::ENV_CONFIG_DIR
            );
        }
        Self::load(&path)
    }

    /// Check names are unique and hosts are set
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                bail!("Device with host '{}' has no name", device.host);
            }
            if device.host.trim().is_empty() {
                bail!("Device '{}' has no host", device.name);
            }
            if !seen.insert(device.name.as_str()) {
                bail!("Device '{}' is listed twice", device.name);
            }
        }
        Ok(())
    }

    /// Devices named on the command line, or all of them
    pub fn select(&self, names: &[String]) -> Result<Vec<&Device>> {
        if names.is_empty() {
            if self.devices.is_empty() {
                bail!("Inventory has no devices");
            }
            return Ok(self.devices.iter().collect());
        }
        names
            .iter()
            .map(|name| {
                self.devices
                    .iter()
                    .find(|d| &d.name == name)
                    .with_context(|| format!("Unknown device '{name}'"))
            })
            .collect()
    }
}

/// Read a TOML or JSON file into `T`, choosing the format by extension
pub fn load_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    match format_of(path) {
        FileFormat::Json => serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display())),
        FileFormat::Toml => {
            toml::from_str(&content).with_context(|| format!("Invalid TOML in {}", path.display()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Toml,
    Json,
}

pub fn format_of(path: &Path) -> FileFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => FileFormat::Json,
        _ => FileFormat::Toml,
    }
}

/// Path relative to the directory of another file, unless absolute
pub fn resolve_relative(base: &Path, path: &str) -> PathBuf {
    let expanded = paths::expand(path);
    if expanded.is_absolute() {
        return expanded;
    }
    base.parent()
        .map_or_else(|| expanded.clone(), |dir| dir.join(&expanded))
}

// ============================================================================
// Tests
// ============================================================================
