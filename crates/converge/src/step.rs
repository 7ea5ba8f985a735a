//! Step trait for idempotent provisioning actions
//!
//! A Step is a named unit of work with a phase, dependencies, an `apply`
//! action and an `is_applied` check that reports whether the action's
//! effect is currently in place.

use crate::error::StepError;
use crate::types::Phase;
use std::fmt;
use std::sync::Arc;

/// Context passed to `apply`
#[derive(Debug, Clone, Copy)]
pub struct ApplyContext<'a> {
    /// Deployment identity the plan runs against
    pub identity: &'a str,
    /// 1-indexed attempt number within the current run
    pub attempt: u32,
}

/// Core trait for provisioning steps
///
/// # Idempotence contract
///
/// Applying a step whose effect is already in place must change nothing.
/// `is_applied` must return `true` right after a successful `apply`;
/// the engine treats anything else as a postcondition violation.
///
/// # Example
///
/// ```ignore
/// use converge::{ApplyContext, Phase, Step, StepError};
///
/// #[derive(Debug)]
/// struct MarkerFile { path: std::path::PathBuf }
///
/// impl Step for MarkerFile {
///     fn id(&self) -> &str { "marker" }
///     fn description(&self) -> String { format!("Create {}", self.path.display()) }
///     fn phase(&self) -> Phase { Phase::Configure }
///
///     fn is_applied(&self) -> Result<bool, StepError> {
///         Ok(self.path.exists())
///     }
///
///     fn apply(&self, _ctx: &ApplyContext) -> Result<(), StepError> {
///         std::fs::write(&self.path, b"ok")?;
///         Ok(())
///     }
/// }
/// ```
pub trait Step: Send + Sync + fmt::Debug {
    /// Stable identifier, unique within a registry (e.g. "firewall.rules")
    fn id(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> String;

    /// Phase this step belongs to
    fn phase(&self) -> Phase;

    /// Ids of steps that must have succeeded before this one runs
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether the step's effect is currently in place on the host
    fn is_applied(&self) -> Result<bool, StepError>;

    /// Converge the host so that `is_applied` holds
    fn apply(&self, ctx: &ApplyContext) -> Result<(), StepError>;
}

/// A shared, type-erased step
pub type SharedStep = Arc<dyn Step>;
