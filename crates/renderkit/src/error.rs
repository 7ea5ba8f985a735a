//! Error types for renderkit

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Template syntax error or missing binding
    #[error("failed to render template '{template}': {message}")]
    Render { template: String, message: String },

    #[error("unknown template '{0}'")]
    UnknownTemplate(String),

    /// Disk or permission failure while writing an artifact
    #[error("failed to write {}: {message}", .path.display())]
    Persist { path: PathBuf, message: String },
}

impl Error {
    pub(crate) fn persist(path: &std::path::Path, message: impl Into<String>) -> Self {
        Self::Persist {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub fn is_persist(&self) -> bool {
        matches!(self, Self::Persist { .. })
    }
}

/// Render errors are fatal; persist errors are retried by the engine.
impl From<Error> for converge::StepError {
    fn from(err: Error) -> Self {
        if err.is_persist() {
            Self::transient(err.to_string())
        } else {
            Self::fatal(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
