//! # Converge
//!
//! Ordered, idempotent provisioning steps with a durable execution record.
//!
//! Steps declare a phase (`install`, `configure`, `deploy`), their
//! dependencies, an `is_applied` check and an `apply` action. The engine
//! runs them in dependency order, retries transient failures with
//! exponential backoff, and writes the outcome of every step to disk before
//! moving on, so an interrupted run resumes where it stopped.
//!
//! ## Core Concepts
//!
//! - **Step**: One unit of convergence with an idempotence check
//! - **StepRegistry**: Holds steps and orders them into a plan
//! - **ProvisioningPlan**: Validated, topologically ordered steps per phase
//! - **ExecutionRecord**: Per-deployment status of every step, on disk
//! - **ExecutionEngine**: Runs a plan against the record
//!
//! ## Example
//!
//! ```ignore
//! use converge::{
//!     Cancellation, ExecuteOptions, ExecutionEngine, NoProgress, Phase, RecordStore,
//!     StepRegistry,
//! };
//!
//! let mut registry = StepRegistry::new();
//! registry.register(InstallPackages::new(adapters.clone()));
//! registry.register(HardenSsh::new(adapters.clone()));
//!
//! let plan = registry.build_plan(&Phase::ALL.into_iter().collect())?;
//! let engine = ExecutionEngine::new("web-1", RecordStore::new(record_path), ExecuteOptions::default());
//! let report = engine.run(&plan, &mut NoProgress, &Cancellation::new())?;
//! ```
//!
//! ## Seams
//!
//! - [`ProgressCallback`]: Receives progress updates
//! - [`Clock`]: Time source for backoff sleeps (virtual in tests)
//! - [`Cancellation`]: Stops a run between steps

pub mod clock;
pub mod context;
pub mod engine;
pub mod error;
pub mod lock;
pub mod record;
pub mod registry;
pub mod retry;
pub mod step;
pub mod types;

// Re-export main types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{Cancellation, NoProgress, ProgressCallback};
pub use engine::ExecutionEngine;
pub use error::{Error, ErrorKind, Result, StepError};
pub use lock::DeploymentLock;
pub use record::{ExecutionRecord, RecordStore, StepRecord};
pub use registry::{ProvisioningPlan, StepRegistry};
pub use retry::{RetryCallback, RetryConfig, with_retry};
pub use step::{ApplyContext, SharedStep, Step};
pub use types::{
    ExecuteOptions, Phase, PhaseReport, PhaseStatus, RunReport, StepFailure, StepOutcome,
    StepStatus,
};
