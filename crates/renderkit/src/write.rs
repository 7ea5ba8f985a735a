//! Atomic artifact writes
//!
//! Bytes go to a temp file in the target directory whose permissions are
//! set before anything is written, then the temp file is renamed over the
//! target. A reader never sees a partial file or a secret file with loose
//! permissions.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Permission class of a rendered artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileMode {
    /// 0644
    Public,
    /// 0600, for anything embedding secret material
    Secret,
}

impl FileMode {
    pub fn bits(&self) -> u32 {
        match self {
            Self::Public => 0o644,
            Self::Secret => 0o600,
        }
    }
}

/// Result of writing an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Written,
    /// Content and mode already matched; the file was not touched
    Unchanged,
}

/// Whether `path` already holds exactly `artifact` with `mode`
pub fn is_current(path: &Path, artifact: &[u8], mode: FileMode) -> bool {
    match fs::read(path) {
        Ok(existing) => existing == artifact && mode_matches(path, mode),
        Err(_) => false,
    }
}

/// Atomically replace `path` with `artifact`
pub fn write_atomic(path: &Path, artifact: &[u8], mode: FileMode) -> Result<WriteOutcome> {
    if is_current(path, artifact, mode) {
        log::debug!("{} is up to date", path.display());
        return Ok(WriteOutcome::Unchanged);
    }

    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir).map_err(|e| Error::persist(path, format!("failed to create directory: {e}")))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| Error::persist(path, format!("failed to create temp file: {e}")))?;
    set_mode(tmp.path(), mode).map_err(|e| Error::persist(path, format!("failed to set permissions: {e}")))?;
    tmp.write_all(artifact)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| Error::persist(path, format!("failed to write: {e}")))?;
    tmp.persist(path)
        .map_err(|e| Error::persist(path, format!("failed to replace: {}", e.error)))?;

    log::info!("Wrote {} ({:o})", path.display(), mode.bits());
    Ok(WriteOutcome::Written)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: FileMode) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode.bits()))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: FileMode) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn mode_matches(path: &Path, mode: FileMode) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|m| m.permissions().mode() & 0o777 == mode.bits())
}

#[cfg(not(unix))]
fn mode_matches(_path: &Path, _mode: FileMode) -> bool {
    true
}
