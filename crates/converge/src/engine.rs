//! Execution engine - runs a plan phase by phase against a durable record
//!
//! Per step the engine:
//! 1. Skips steps recorded `succeeded` whose `is_applied` check still holds
//!    (unless forced); a failing check is treated as drift and re-applied.
//! 2. Marks the step `skipped` if any dependency has not succeeded.
//! 3. Applies it, retrying transient failures with backoff, then verifies
//!    the postcondition with `is_applied`.
//! 4. Persists the record before moving on.
//!
//! A phase with any failed or skipped step ends in partial failure and later
//! phases are not attempted. A fatal error aborts the phase immediately.

use crate::clock::{Clock, SystemClock};
use crate::context::{Cancellation, ProgressCallback};
use crate::error::{Error, Result, StepError};
use crate::record::{ExecutionRecord, RecordStore};
use crate::registry::ProvisioningPlan;
use crate::retry::{RetryCallback, with_retry};
use crate::step::{ApplyContext, SharedStep};
use crate::types::{
    ExecuteOptions, Phase, PhaseReport, PhaseStatus, RunReport, StepFailure, StepOutcome,
    StepStatus,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

type Redactor = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Runs provisioning plans for one deployment identity
pub struct ExecutionEngine {
    identity: String,
    store: RecordStore,
    options: ExecuteOptions,
    clock: Arc<dyn Clock>,
    redactor: Option<Redactor>,
}

impl ExecutionEngine {
    pub fn new(identity: &str, store: RecordStore, options: ExecuteOptions) -> Self {
        Self {
            identity: identity.to_string(),
            store,
            options,
            clock: Arc::new(SystemClock::new()),
            redactor: None,
        }
    }

    /// Use a custom clock for backoff sleeps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Scrub every error message before it is recorded or reported
    pub fn with_redactor<F>(mut self, redactor: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.redactor = Some(Box::new(redactor));
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Load the current record without running anything
    pub fn record(&self) -> Result<ExecutionRecord> {
        self.store.load(&self.identity)
    }

    /// Run every phase of the plan in order.
    ///
    /// Returns `Err` only for infrastructure problems (record I/O, unknown
    /// forced steps). Step failures are reported in the [`RunReport`].
    pub fn run<P: ProgressCallback>(
        &self,
        plan: &ProvisioningPlan,
        progress: &mut P,
        cancel: &Cancellation,
    ) -> Result<RunReport> {
        if let Some(id) = self.options.force.iter().find(|id| !plan.contains(id)) {
            return Err(Error::UnknownForcedStep { id: id.clone() });
        }

        let mut record = self.store.load(&self.identity)?;
        let mut report = RunReport {
            phases: Vec::new(),
            dry_run: self.options.dry_run,
        };
        // Steps a dry run would apply, so their dependents are not shown as skipped
        let mut planned: BTreeSet<String> = BTreeSet::new();
        let mut halted = false;

        for phase in plan.phases() {
            if halted {
                let steps = plan
                    .steps_in(phase)
                    .map(|s| {
                        StepOutcome::new(s.id(), phase, record.status(s.id()))
                            .with_reason("not attempted: an earlier phase did not succeed")
                    })
                    .collect();
                report.phases.push(PhaseReport {
                    phase,
                    status: PhaseStatus::NotAttempted,
                    steps,
                });
                continue;
            }

            let phase_report =
                self.run_phase(phase, plan, &mut record, &mut planned, progress, cancel)?;
            if !phase_report.status.is_success() {
                log::warn!(
                    "Phase {} ended with {}; later phases will not run",
                    phase,
                    phase_report.status
                );
                halted = true;
            }
            progress.on_phase_complete(&phase_report);
            report.phases.push(phase_report);
        }

        Ok(report)
    }

    fn run_phase<P: ProgressCallback>(
        &self,
        phase: Phase,
        plan: &ProvisioningPlan,
        record: &mut ExecutionRecord,
        planned: &mut BTreeSet<String>,
        progress: &mut P,
        cancel: &Cancellation,
    ) -> Result<PhaseReport> {
        let steps: Vec<&SharedStep> = plan.steps_in(phase).collect();
        progress.on_phase_start(phase, steps.len());
        log::info!("Phase {} ({} steps)", phase, steps.len());

        let mut outcomes = Vec::with_capacity(steps.len());
        let mut status = PhaseStatus::Success;

        for (i, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                log::warn!("Cancelled before step {}", step.id());
                status = PhaseStatus::Cancelled;
                outcomes.extend(
                    steps[i..]
                        .iter()
                        .map(|s| untouched(s, &*record, "not attempted: run cancelled")),
                );
                break;
            }

            let outcome = self.run_step(step, record, planned, progress)?;
            progress.on_step_complete(&outcome);

            let fatal = outcome
                .failure
                .as_ref()
                .is_some_and(|f| f.kind.aborts_phase());
            if matches!(outcome.status, StepStatus::Failed | StepStatus::Skipped) {
                status = PhaseStatus::PartialFailure;
            }
            outcomes.push(outcome);

            if fatal {
                status = PhaseStatus::Fatal;
                let reason = format!("not attempted: aborted after fatal error in '{}'", step.id());
                outcomes.extend(
                    steps[i + 1..]
                        .iter()
                        .map(|s| untouched(s, &*record, &reason)),
                );
                break;
            }
        }

        Ok(PhaseReport {
            phase,
            status,
            steps: outcomes,
        })
    }

    fn run_step<P: ProgressCallback>(
        &self,
        step: &SharedStep,
        record: &mut ExecutionRecord,
        planned: &mut BTreeSet<String>,
        progress: &mut P,
    ) -> Result<StepOutcome> {
        let id = step.id();
        let phase = step.phase();
        let forced = self.options.force.contains(id);

        if record.is_succeeded(id) {
            if forced {
                log::info!("Step {} forced; re-applying", id);
            } else {
                match step.is_applied() {
                    Ok(true) => {
                        log::debug!("Step {} already applied, skipping", id);
                        return Ok(StepOutcome::new(id, phase, StepStatus::Succeeded)
                            .with_reason("already applied"));
                    }
                    Ok(false) => {
                        log::warn!("Step {} was recorded as succeeded but has drifted; re-applying", id);
                    }
                    Err(e) => {
                        log::warn!(
                            "Could not verify step {} ({}); re-applying",
                            id,
                            self.redact(&e.message)
                        );
                    }
                }
            }
        }

        if let Some(dep) = step
            .depends_on()
            .into_iter()
            .find(|d| !record.is_succeeded(d) && !planned.contains(d))
        {
            let reason = format!(
                "dependency '{}' has not succeeded ({})",
                dep,
                record.status(&dep)
            );
            log::info!("Skipping step {}: {}", id, reason);
            if !self.options.dry_run {
                record.mark_skipped(id, &reason);
                self.store.save(record)?;
            }
            return Ok(StepOutcome::new(id, phase, StepStatus::Skipped).with_reason(reason));
        }

        if self.options.dry_run {
            planned.insert(id.to_string());
            return Ok(StepOutcome::new(id, phase, record.status(id)).with_reason("would apply"));
        }

        progress.on_step_start(id, &step.description());
        log::info!("Applying step {}: {}", id, step.description());

        let mut attempts = 0u32;
        let mut callback = ProgressRetry { id, progress };
        let applied = with_retry(
            &self.options.retry,
            self.clock.as_ref(),
            &mut callback,
            || {
                attempts += 1;
                step.apply(&ApplyContext {
                    identity: &self.identity,
                    attempt: attempts,
                })
            },
        );

        let result = applied.and_then(|()| match step.is_applied() {
            Ok(true) => Ok(()),
            Ok(false) => Err(StepError::postcondition(id)),
            Err(e) => Err(StepError::fatal(format!(
                "postcondition check for '{id}' failed: {}",
                e.message
            ))),
        });

        let mut outcome = StepOutcome::new(id, phase, StepStatus::Succeeded);
        outcome.attempts = attempts;

        match result {
            Ok(()) => {
                log::info!("Step {} succeeded after {} attempt(s)", id, attempts);
                record.mark_succeeded(id, attempts);
            }
            Err(e) => {
                let message = self.redact(&e.message);
                log::error!("Step {} failed ({}): {}", id, e.kind, message);
                record.mark_failed(id, e.kind, &message, attempts);
                outcome.status = StepStatus::Failed;
                outcome.failure = Some(StepFailure {
                    kind: e.kind,
                    message,
                    resumable: e.kind.resumable(),
                });
            }
        }

        self.store.save(record)?;
        Ok(outcome)
    }

    fn redact(&self, message: &str) -> String {
        match &self.redactor {
            Some(redact) => redact(message),
            None => message.to_string(),
        }
    }
}

/// Outcome for a step the engine did not touch in this run
fn untouched(step: &SharedStep, record: &ExecutionRecord, reason: &str) -> StepOutcome {
    StepOutcome::new(step.id(), step.phase(), record.status(step.id())).with_reason(reason)
}

/// Forwards retry notifications to the log and the progress callback
struct ProgressRetry<'a, P> {
    id: &'a str,
    progress: &'a mut P,
}

impl<P: ProgressCallback> RetryCallback for ProgressRetry<'_, P> {
    fn on_retry(&mut self, attempt: u32, max_attempts: u32, error: &StepError, delay: Duration) {
        log::warn!(
            "Step {} attempt {}/{} failed ({}); retrying in {:.1}s",
            self.id,
            attempt,
            max_attempts,
            error.kind,
            delay.as_secs_f64()
        );
        self.progress
            .on_step_retry(self.id, attempt, max_attempts, error, delay);
    }
}
