//! # Renderkit
//!
//! Turns typed configuration into files on disk: deterministic template
//! rendering plus atomic, permission-safe writes that skip unchanged files.

pub mod error;
pub mod renderer;
pub mod write;

pub use error::{Error, Result};
pub use renderer::ConfigRenderer;
pub use write::{FileMode, WriteOutcome, is_current, write_atomic};
