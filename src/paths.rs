//! Path resolution for tikconf
//!
//! # Environment Variables
//!
//! - `TIKCONF_CONFIG_DIR` - Override config directory (e.g., `~/network/tikconf`)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `TIKCONF_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/tikconf` (if set)
//! 3. Platform default:
//!    - Windows: `%APPDATA%\tikconf`
//!    - macOS/Linux: `~/.config/tikconf`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "TIKCONF_CONFIG_DIR";

/// File name of the device inventory inside the config directory
pub const INVENTORY_FILE: &str = "inventory.toml";

/// Get the tikconf config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("tikconf");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            let path = app_data.join("tikconf");
            log::debug!("Using Windows config dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("tikconf");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Default inventory location
pub fn inventory_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(INVENTORY_FILE))
}

/// Expand ~ and environment variables in a path string.
///
/// Unknown variables are left as they are.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================
