//! Progress and cancellation seams
//!
//! These let the engine report to a terminal UI (or nothing) and be
//! interrupted between steps without depending on a UI framework.

use crate::error::StepError;
use crate::types::{Phase, PhaseReport, StepOutcome};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Progress callback for execution operations
pub trait ProgressCallback: Send {
    /// Called when a phase starts with the number of steps it holds
    fn on_phase_start(&mut self, phase: Phase, count: usize);

    /// Called when a step is about to be applied
    fn on_step_start(&mut self, id: &str, description: &str);

    /// Called before a transient failure is retried
    fn on_step_retry(
        &mut self,
        id: &str,
        attempt: u32,
        max_attempts: u32,
        error: &StepError,
        delay: Duration,
    );

    /// Called with the final outcome of every step in the phase
    fn on_step_complete(&mut self, outcome: &StepOutcome);

    /// Called when a phase ends
    fn on_phase_complete(&mut self, report: &PhaseReport);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_phase_start(&mut self, _phase: Phase, _count: usize) {}
    fn on_step_start(&mut self, _id: &str, _description: &str) {}
    fn on_step_retry(&mut self, _: &str, _: u32, _: u32, _: &StepError, _: Duration) {}
    fn on_step_complete(&mut self, _outcome: &StepOutcome) {}
    fn on_phase_complete(&mut self, _report: &PhaseReport) {}
}

/// Cooperative cancellation flag, checked between steps.
///
/// A step already in flight runs to completion.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing flag (e.g. one set from a signal handler)
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
