//! Core types for provisioning runs

use crate::error::ErrorKind;
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Coarse-grained provisioning stage.
///
/// Ordering is significant: a phase only starts after every earlier
/// requested phase ended in full success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Install,
    Configure,
    Deploy,
}

impl Phase {
    /// All phases in execution order
    pub const ALL: [Phase; 3] = [Phase::Install, Phase::Configure, Phase::Deploy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Configure => "configure",
            Self::Deploy => "deploy",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "install" => Ok(Self::Install),
            "configure" => Ok(Self::Configure),
            "deploy" => Ok(Self::Deploy),
            other => Err(format!(
                "unknown phase '{other}' (expected install, configure or deploy)"
            )),
        }
    }
}

/// Persisted status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure details attached to a step outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// Whether re-running the plan will attempt this step again
    pub resumable: bool,
}

/// What happened to one step during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub id: String,
    pub phase: Phase,
    pub status: StepStatus,
    /// Number of `apply` invocations made during this run
    pub attempts: u32,
    /// Set when the step was skipped or left untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
}

impl StepOutcome {
    pub(crate) fn new(id: &str, phase: Phase, status: StepStatus) -> Self {
        Self {
            id: id.to_string(),
            phase,
            status,
            attempts: 0,
            reason: None,
            failure: None,
        }
    }

    pub(crate) fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// True when `apply` ran during this run
    pub fn was_applied(&self) -> bool {
        self.attempts > 0
    }
}

/// Aggregate result of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Every step succeeded
    Success,
    /// At least one step failed; completed steps stay recorded for resume
    PartialFailure,
    /// A fatal error aborted the phase
    Fatal,
    /// Cancelled between steps
    Cancelled,
    /// An earlier phase did not fully succeed
    NotAttempted,
}

impl PhaseStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialFailure => "partial failure",
            Self::Fatal => "fatal",
            Self::Cancelled => "cancelled",
            Self::NotAttempted => "not attempted",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-phase report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub steps: Vec<StepOutcome>,
}

impl PhaseReport {
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
    }
}

/// Result of running a plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub phases: Vec<PhaseReport>,
    pub dry_run: bool,
}

impl RunReport {
    /// Overall status: the first non-successful phase decides.
    pub fn status(&self) -> PhaseStatus {
        self.phases
            .iter()
            .map(|p| p.status)
            .find(|s| !s.is_success())
            .unwrap_or(PhaseStatus::Success)
    }

    pub fn is_success(&self) -> bool {
        self.status().is_success()
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn step(&self, id: &str) -> Option<&StepOutcome> {
        self.phases
            .iter()
            .flat_map(|p| p.steps.iter())
            .find(|s| s.id == id)
    }

    /// Total number of `apply` invocations across the run
    pub fn apply_count(&self) -> u32 {
        self.phases
            .iter()
            .flat_map(|p| p.steps.iter())
            .map(|s| s.attempts)
            .sum()
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.phases
            .iter()
            .flat_map(|p| p.steps.iter())
            .filter(|s| s.status == status)
            .count()
    }
}

/// Options for a run
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Evaluate the plan without applying or persisting anything
    pub dry_run: bool,
    /// Step ids to re-apply even when recorded as succeeded
    pub force: BTreeSet<String>,
    /// Retry policy for transient failures
    pub retry: RetryConfig,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            force: BTreeSet::new(),
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        assert!(Phase::Install < Phase::Configure);
        assert!(Phase::Configure < Phase::Deploy);
    }

    #[test]
    fn test_phase_parse() {
        assert_eq!("install".parse::<Phase>().unwrap(), Phase::Install);
        assert_eq!(" Deploy ".parse::<Phase>().unwrap(), Phase::Deploy);
        assert!("teardown".parse::<Phase>().is_err());
    }

    #[test]
    fn test_run_report_status_first_failure_wins() {
        let report = RunReport {
            phases: vec![
                PhaseReport {
                    phase: Phase::Install,
                    status: PhaseStatus::Success,
                    steps: vec![],
                },
                PhaseReport {
                    phase: Phase::Configure,
                    status: PhaseStatus::PartialFailure,
                    steps: vec![],
                },
                PhaseReport {
                    phase: Phase::Deploy,
                    status: PhaseStatus::NotAttempted,
                    steps: vec![],
                },
            ],
            dry_run: false,
        };
        assert_eq!(report.status(), PhaseStatus::PartialFailure);
        assert!(!report.is_success());
    }
}
