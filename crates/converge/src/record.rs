//! Durable per-deployment execution record
//!
//! The record maps step ids to their last known status. It is written
//! after every step attempt, atomically, so a crash loses at most the
//! in-flight step. Unknown fields are ignored on load and missing fields
//! take their defaults (`pending`), which keeps old records readable.

use crate::error::{Error, ErrorKind, Result};
use crate::types::StepStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

// ============================================================================
// Record Structures
// ============================================================================

/// Persisted state of a single step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(default)]
    pub status: StepStatus,

    /// Last error message (already scrubbed of secrets by the caller)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Classification of the last error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Attempts made during the last run that touched this step
    #[serde(default)]
    pub attempts: u32,

    /// When the status last changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Main record structure for one deployment identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Deployment identity this record belongs to
    #[serde(default)]
    pub identity: String,

    /// Step id -> record
    #[serde(default)]
    pub steps: BTreeMap<String, StepRecord>,

    /// Last time the record was written
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            steps: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Status of a step; steps never seen are `pending`
    pub fn status(&self, id: &str) -> StepStatus {
        self.steps.get(id).map(|r| r.status).unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Option<&StepRecord> {
        self.steps.get(id)
    }

    pub fn is_succeeded(&self, id: &str) -> bool {
        self.status(id) == StepStatus::Succeeded
    }

    /// Mark a step as succeeded, clearing any previous error
    pub fn mark_succeeded(&mut self, id: &str, attempts: u32) {
        let record = self.steps.entry(id.to_string()).or_default();
        record.status = StepStatus::Succeeded;
        record.last_error = None;
        record.error_kind = None;
        record.attempts = attempts;
        record.timestamp = Some(Utc::now());
    }

    /// Mark a step as failed with a classified error
    pub fn mark_failed(&mut self, id: &str, kind: ErrorKind, error: &str, attempts: u32) {
        let record = self.steps.entry(id.to_string()).or_default();
        record.status = StepStatus::Failed;
        record.last_error = Some(error.to_string());
        record.error_kind = Some(kind);
        record.attempts = attempts;
        record.timestamp = Some(Utc::now());
    }

    /// Mark a step as skipped because a prerequisite is unsatisfied
    pub fn mark_skipped(&mut self, id: &str, reason: &str) {
        let record = self.steps.entry(id.to_string()).or_default();
        record.status = StepStatus::Skipped;
        record.last_error = Some(reason.to_string());
        record.error_kind = None;
        record.attempts = 0;
        record.timestamp = Some(Utc::now());
    }
}

// ============================================================================
// Record Store
// ============================================================================

/// File-backed store for an [`ExecutionRecord`]
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, or start an empty one if the file does not exist
    pub fn load(&self, identity: &str) -> Result<ExecutionRecord> {
        if !self.path.exists() {
            log::debug!(
                "Execution record {} does not exist, starting empty",
                self.path.display()
            );
            return Ok(ExecutionRecord::new(identity));
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| Error::record(&self.path, format!("failed to read: {e}")))?;

        let mut record: ExecutionRecord = toml::from_str(&content)
            .map_err(|e| Error::record(&self.path, format!("failed to parse: {e}")))?;

        if record.identity.is_empty() {
            record.identity = identity.to_string();
        } else if record.identity != identity {
            return Err(Error::record(
                &self.path,
                format!(
                    "belongs to deployment '{}', not '{identity}'",
                    record.identity
                ),
            ));
        }

        log::debug!(
            "Loaded execution record from {} ({} steps)",
            self.path.display(),
            record.steps.len()
        );
        Ok(record)
    }

    /// Atomically write the record (temp file in the same directory, then rename)
    pub fn save(&self, record: &mut ExecutionRecord) -> Result<()> {
        record.last_updated = Utc::now();

        let dir = self.path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir)
            .map_err(|e| Error::record(&self.path, format!("failed to create directory: {e}")))?;

        let content = toml::to_string_pretty(record)
            .map_err(|e| Error::record(&self.path, format!("failed to serialize: {e}")))?;

        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| Error::record(&self.path, format!("failed to create temp file: {e}")))?;
        tmp.write_all(content.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| Error::record(&self.path, format!("failed to write: {e}")))?;
        tmp.persist(&self.path)
            .map_err(|e| Error::record(&self.path, format!("failed to replace: {}", e.error)))?;

        log::debug!("Saved execution record to {}", self.path.display());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
