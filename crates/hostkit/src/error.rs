//! Error types for host tool invocations.
//!
//! Failures are categorized from the tool's stderr so the engine can tell
//! a busy package lock or a flaky mirror (retry) from a permission problem
//! (fail, resume later) or a rejected configuration (abort).

use converge::{ErrorKind, StepError};
use thiserror::Error;

/// Categories of host tool errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// DNS, timeouts, unreachable mirrors or registries
    Network,
    /// Another process holds the package manager or xtables lock
    LockContention,
    /// Package, unit, image or jail does not exist
    NotFound,
    /// Permission denied (not running as root?)
    Permission,
    /// The tool rejected our configuration
    InvalidConfig,
    /// The tool itself is not installed
    CommandMissing,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::LockContention)
    }

    /// Engine classification for this category
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network | Self::LockContention => ErrorKind::Transient,
            Self::InvalidConfig => ErrorKind::Fatal,
            Self::NotFound | Self::Permission | Self::CommandMissing | Self::Other => {
                ErrorKind::Persistent
            }
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network connectivity issue",
            Self::LockContention => "Resource locked by another process",
            Self::NotFound => "Not found",
            Self::Permission => "Permission denied",
            Self::InvalidConfig => "Configuration rejected",
            Self::CommandMissing => "Required tool not installed",
            Self::Other => "Unexpected error",
        }
    }

    /// Actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Network => "Check network access to the package mirror and container registry",
            Self::LockContention => "Wait for unattended-upgrades or the other package operation to finish",
            Self::NotFound => "Verify package, unit and image names in provision.toml",
            Self::Permission => "Run provision as root",
            Self::InvalidConfig => "Fix the reported configuration value and re-run",
            Self::CommandMissing => "Run the install phase first or install the tool manually",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while driving host tools.
#[derive(Debug, Error)]
pub enum Error {
    /// A tool exited unsuccessfully
    #[error("{tool} failed ({}): {message}", .category.description())]
    Command {
        tool: String,
        category: ErrorCategory,
        message: String,
    },

    /// The executable is not on PATH
    #[error("{tool} is not installed")]
    CommandMissing { tool: String },

    /// Tool output could not be interpreted
    #[error("unexpected output from {tool}: {message}")]
    Parse { tool: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Write(#[from] renderkit::Error),
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Command { category, .. } => *category,
            Self::CommandMissing { .. } => ErrorCategory::CommandMissing,
            Self::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                ErrorCategory::Permission
            }
            _ => ErrorCategory::Other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Create an error from a failed tool's stderr.
    pub fn from_output(tool: &str, stderr: &str) -> Self {
        let lower = stderr.to_lowercase();

        // Permission (checked first: apt reports a failed lock open as both)
        let category = if lower.contains("permission denied")
            || lower.contains("operation not permitted")
            || lower.contains("are you root")
            || lower.contains("must be run as root")
            || lower.contains("need to be root")
            || lower.contains("unauthorized")
            || lower.contains("invalid credentials")
            || lower.contains("authentication required")
        {
            ErrorCategory::Permission
        }
        // Lock contention (dpkg/apt, xtables)
        else if lower.contains("could not get lock")
            || lower.contains("unable to acquire the dpkg frontend lock")
            || lower.contains("is another process using it")
            || lower.contains("another app is currently holding the xtables lock")
            || lower.contains("resource temporarily unavailable")
        {
            ErrorCategory::LockContention
        }
        // Network errors
        else if lower.contains("temporary failure resolving")
            || lower.contains("could not resolve")
            || lower.contains("failed to fetch")
            || lower.contains("connection refused")
            || lower.contains("connection timed out")
            || lower.contains("timed out")
            || lower.contains("tls handshake timeout")
            || lower.contains("i/o timeout")
            || lower.contains("toomanyrequests")
            || lower.contains("network is unreachable")
        {
            ErrorCategory::Network
        }
        // Not found
        else if lower.contains("unable to locate package")
            || lower.contains("has no installation candidate")
            || lower.contains("could not be found")
            || lower.contains("not found")
            || lower.contains("manifest unknown")
            || lower.contains("no such")
        {
            ErrorCategory::NotFound
        }
        // Rejected configuration
        else if lower.contains("invalid")
            || lower.contains("bad port")
            || lower.contains("could not parse")
            || lower.contains("yaml:")
            || lower.contains("syntax error")
            || lower.contains("unsupported")
        {
            ErrorCategory::InvalidConfig
        } else {
            ErrorCategory::Other
        };

        let message = stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .unwrap_or("exited with an error")
            .to_string();

        Self::Command {
            tool: tool.to_string(),
            category,
            message,
        }
    }
}

impl From<Error> for StepError {
    fn from(err: Error) -> Self {
        if let Error::Write(e) = err {
            return e.into();
        }
        let category = err.category();
        Self::new(category.kind(), format!("{err}; {}", category.advice()))
    }
}

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, Error>;
