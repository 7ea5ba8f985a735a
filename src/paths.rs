//! Centralized path resolution for provision
//!
//! # Environment Variables
//!
//! - `PROVISION_CONFIG_DIR` - Override config directory
//! - `PROVISION_STATE_DIR` - Override state directory (records, secrets, locks)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `PROVISION_CONFIG_DIR` environment variable
//! 2. `/etc/provision` when running as root
//! 3. `XDG_CONFIG_HOME/provision` (if set)
//! 4. Platform default (`~/.config/provision`)
//!
//! For state_dir():
//! 1. `PROVISION_STATE_DIR` environment variable
//! 2. `/var/lib/provision` when running as root
//! 3. `XDG_STATE_HOME/provision` (if set)
//! 4. Platform default (`~/.local/state/provision`)

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "PROVISION_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "PROVISION_STATE_DIR";

const APP: &str = "provision";

/// Get the provision config directory path
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

    if is_root() {
        return Ok(PathBuf::from("/etc").join(APP));
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the provision state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if is_root() {
        return Ok(PathBuf::from("/var/lib").join(APP));
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Default config file location
pub fn default_config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("provision.toml"))
}

/// Per-identity state files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    pub dir: PathBuf,
}

impl StateLayout {
    pub fn new(state_root: &Path, identity: &str) -> Self {
        Self {
            dir: state_root.join(identity),
        }
    }

    pub fn record(&self) -> PathBuf {
        self.dir.join("record.toml")
    }

    pub fn secrets(&self) -> PathBuf {
        self.dir.join("secrets.toml")
    }

    pub fn lock(&self) -> PathBuf {
        self.dir.join("run.lock")
    }
}

/// Expand ~ and environment variables in a path string.
///
/// Unknown variables are left as written.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Whether the process runs with root privileges
#[cfg(unix)]
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}

// ============================================================================
// Tests
// ============================================================================
