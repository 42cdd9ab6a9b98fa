//! Centralized path resolution for cloudup
//!
//! # Environment Variables
//!
//! - `CLOUDUP_CONFIG_DIR` - Override config directory (where `cluster.toml` lives)
//! - `CLOUDUP_STATE_DIR` - Override state directory (local cloud state, local buckets)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `CLOUDUP_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/cloudup` (if set)
//! 3. Platform default:
//!    - Windows: `%APPDATA%\cloudup`
//!    - macOS/Linux: `~/.config/cloudup`
//!
//! For state_dir():
//! 1. `CLOUDUP_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/cloudup` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\cloudup`
//!    - macOS/Linux: `~/.local/state/cloudup`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "CLOUDUP_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "CLOUDUP_STATE_DIR";

/// File name of the cluster declaration
pub const CLUSTER_FILE: &str = "cluster.toml";

/// File name of the local cloud state, under the state dir
pub const CLOUD_STATE_FILE: &str = "cloud.json";

/// Get the cloudup config directory path
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
        let path = PathBuf::from(xdg_config).join("cloudup");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            let path = app_data.join("cloudup");
            log::debug!("Using Windows config dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("cloudup");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the cloudup state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("cloudup");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("cloudup");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("cloudup");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// The cluster file to load: an explicit `-f` path wins over the config dir.
pub fn cluster_file(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(expand(&path.to_string_lossy())),
        None => Ok(config_dir()?.join(CLUSTER_FILE)),
    }
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve_relative(base: &Path, path: &str) -> PathBuf {
    let expanded = expand(path);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================
