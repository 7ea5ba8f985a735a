//! Error types for plan construction and step execution.
//!
//! Two families live here:
//! - [`Error`]: problems with the plan or the persisted state itself
//!   (cycles, bad declarations, record I/O, lock contention).
//! - [`StepError`]: a failure returned by a step's `apply`/`is_applied`,
//!   carrying an [`ErrorKind`] that drives retry and phase abort decisions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Classification of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network timeout, mirror unavailable, temporary lock contention
    Transient,
    /// Permission denied, disk full, invalid credentials
    Persistent,
    /// Programming or configuration error; aborts the phase
    Fatal,
}

impl ErrorKind {
    /// Whether a failure of this kind is retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Whether a failure of this kind stops the remaining steps of the phase.
    pub fn aborts_phase(&self) -> bool {
        matches!(self, Self::Fatal)
    }

    /// Whether re-running the same plan will attempt the step again
    /// without operator intervention.
    pub fn resumable(&self) -> bool {
        !matches!(self, Self::Fatal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Persistent => "persistent",
            Self::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure raised by a step.
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn persistent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Persistent, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// The error raised when `is_applied` still fails right after a
    /// successful `apply`.
    pub fn postcondition(step_id: &str) -> Self {
        Self::fatal(format!(
            "postcondition violated: step '{step_id}' applied without error but is not in effect"
        ))
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<std::io::Error> for StepError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match err.kind() {
            Io::TimedOut | Io::Interrupted | Io::WouldBlock | Io::ConnectionReset => {
                ErrorKind::Transient
            }
            _ => ErrorKind::Persistent,
        };
        Self::new(kind, err.to_string())
    }
}

/// Errors raised while building plans or persisting execution state.
#[derive(Debug, Error)]
pub enum Error {
    /// The dependency graph contains a cycle
    #[error("cyclic dependency between steps: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// Step ids participating in the cycle
        cycle: Vec<String>,
    },

    /// Two steps were registered with the same id
    #[error("duplicate step id: {id}")]
    DuplicateStep { id: String },

    /// A step depends on an id nobody registered
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    /// A step depends on a step that runs in a later phase
    #[error("step '{step}' ({phase}) depends on '{dependency}' from later phase {dependency_phase}")]
    PhaseOrder {
        step: String,
        phase: String,
        dependency: String,
        dependency_phase: String,
    },

    /// `--force-step` named a step that is not in the plan
    #[error("cannot force unknown step '{id}'")]
    UnknownForcedStep { id: String },

    /// Reading or writing the execution record failed
    #[error("execution record {}: {message}", .path.display())]
    Record { path: PathBuf, message: String },

    /// Another run holds the deployment lock
    #[error("deployment '{identity}' is locked by another run ({holder}); lock file: {}", .path.display())]
    Locked {
        identity: String,
        holder: String,
        path: PathBuf,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn record(path: &std::path::Path, message: impl Into<String>) -> Self {
        Self::Record {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Whether this is a programming error in step declarations.
    pub fn is_declaration_error(&self) -> bool {
        matches!(
            self,
            Self::CyclicDependency { .. }
                | Self::DuplicateStep { .. }
                | Self::UnknownDependency { .. }
                | Self::PhaseOrder { .. }
        )
    }
}

/// Result type for converge operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_retryable() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(!ErrorKind::Persistent.is_retryable());
        assert!(!ErrorKind::Fatal.is_retryable());
    }

    #[test]
    fn test_error_kind_resumable() {
        assert!(ErrorKind::Transient.resumable());
        assert!(ErrorKind::Persistent.resumable());
        assert!(!ErrorKind::Fatal.resumable());
        assert!(ErrorKind::Fatal.aborts_phase());
    }

    #[test]
    fn test_io_error_classification() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(StepError::from(timeout).kind, ErrorKind::Transient);

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(StepError::from(denied).kind, ErrorKind::Persistent);
    }

    #[test]
    fn test_cycle_message() {
        let err = Error::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency between steps: a -> b -> a");
        assert!(err.is_declaration_error());
    }
}
