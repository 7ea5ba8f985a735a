//! Per-deployment mutual exclusion
//!
//! The guard holds an exclusive advisory lock on `run.lock`. The kernel
//! drops the lock when the holder exits for any reason, so a file left
//! behind by a killed run does not block the next one. The file body names
//! the holder and is only read for error messages.

use crate::error::{Error, Result};
use chrono::Utc;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Guard for the deployment lock; released on drop
#[derive(Debug)]
pub struct DeploymentLock {
    path: PathBuf,
    // Closing the file releases the lock
    _file: File,
}

impl DeploymentLock {
    /// Acquire the lock at `path` for `identity`.
    ///
    /// Fails with [`Error::Locked`] if another run holds it.
    pub fn acquire(path: &Path, identity: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(Error::Locked {
                    identity: identity.to_string(),
                    holder: read_holder(&mut file),
                    path: path.to_path_buf(),
                });
            }
            Err(TryLockError::Error(e)) => return Err(Error::Io(e)),
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(
            file,
            "pid={} acquired={}",
            std::process::id(),
            Utc::now().to_rfc3339()
        )?;
        file.sync_data()?;
        log::debug!("Acquired deployment lock {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    /// Holder of the lock at `path`, if a live run holds it
    pub fn holder(path: &Path) -> Result<Option<String>> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        match file.try_lock() {
            Ok(()) => Ok(None),
            Err(TryLockError::WouldBlock) => Ok(Some(read_holder(&mut file))),
            Err(TryLockError::Error(e)) => Err(Error::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_holder(file: &mut File) -> String {
    let mut holder = String::new();
    match file.read_to_string(&mut holder) {
        Ok(_) if !holder.trim().is_empty() => holder.trim().to_string(),
        _ => "unknown holder".to_string(),
    }
}
