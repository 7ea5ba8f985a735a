//! Error types for secretkit
//!
//! Messages never carry secret values, only keys and paths.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in secret operations
#[derive(Debug, Error)]
pub enum Error {
    /// The store could not be read or written
    #[error("secret store {} is unavailable: {message}", .path.display())]
    Backend { path: PathBuf, message: String },

    /// The store on disk belongs to another deployment identity
    #[error("secret store {} belongs to deployment '{found}', not '{expected}'", .path.display())]
    IdentityMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// Key names are limited to `[a-z0-9_]`
    #[error("invalid secret key '{0}'")]
    InvalidKey(String),

    #[error("invalid secret spec for '{key}': {message}")]
    InvalidSpec { key: String, message: String },
}

impl Error {
    pub(crate) fn backend(path: &std::path::Path, message: impl Into<String>) -> Self {
        Self::Backend {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// Provisioning must not continue with secrets that were not persisted.
impl From<Error> for converge::StepError {
    fn from(err: Error) -> Self {
        Self::fatal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use converge::ErrorKind;

    #[test]
    fn test_backend_errors_are_fatal() {
        let err = Error::backend(std::path::Path::new("/state/web-1/secrets.toml"), "disk full");
        let step: converge::StepError = err.into();
        assert_eq!(step.kind, ErrorKind::Fatal);
        assert!(step.message.contains("disk full"));
    }
}
