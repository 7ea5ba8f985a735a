//! Terminal progress for provisioning runs.

use colored::Colorize;
use converge::{Phase, PhaseReport, ProgressCallback, StepError, StepOutcome, StepStatus};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner per step, one summary line per finished step.
///
/// Retry notices print only the error kind; the message may come from a
/// tool that echoed its input.
pub struct TerminalProgress {
    quiet: bool,
    bar: Option<ProgressBar>,
    position: usize,
    total: usize,
}

impl TerminalProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            bar: None,
            position: 0,
            total: 0,
        }
    }

    fn spinner(&self, msg: String) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} {prefix:.blue.bold} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_prefix(format!("[{}/{}]", self.position + 1, self.total));
        pb.set_message(msg);
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    fn println(&self, line: String) {
        if self.quiet {
            return;
        }
        match &self.bar {
            Some(pb) => pb.println(line),
            None => println!("{line}"),
        }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_phase_start(&mut self, phase: Phase, count: usize) {
        self.position = 0;
        self.total = count;
        if !self.quiet {
            println!();
            println!("{}", format!("Phase: {phase}").cyan().bold());
        }
    }

    fn on_step_start(&mut self, id: &str, description: &str) {
        self.bar = Some(self.spinner(format!("{id}: {description}")));
    }

    fn on_step_retry(
        &mut self,
        id: &str,
        attempt: u32,
        max_attempts: u32,
        error: &StepError,
        delay: Duration,
    ) {
        self.println(format!(
            "  {} {} attempt {}/{} failed ({}), retrying in {:.1}s",
            "⚠".yellow(),
            id,
            attempt,
            max_attempts,
            error.kind,
            delay.as_secs_f64()
        ));
    }

    fn on_step_complete(&mut self, outcome: &StepOutcome) {
        if let Some(pb) = self.bar.take() {
            pb.finish_and_clear();
        }
        self.position += 1;

        let symbol = match outcome.status {
            StepStatus::Succeeded if outcome.was_applied() => "✓".green(),
            StepStatus::Succeeded => "○".dimmed(),
            StepStatus::Failed => "✗".red(),
            StepStatus::Skipped => "⊘".yellow(),
            StepStatus::Pending => "·".dimmed(),
        };
        let detail = match (&outcome.failure, &outcome.reason) {
            (Some(failure), _) => format!("{}: {}", failure.kind, failure.message),
            (None, Some(reason)) => reason.clone(),
            (None, None) if outcome.attempts > 1 => format!("{} attempts", outcome.attempts),
            (None, None) => String::new(),
        };
        if detail.is_empty() {
            self.println(format!("  {} {}", symbol, outcome.id));
        } else {
            self.println(format!("  {} {} {}", symbol, outcome.id, detail.dimmed()));
        }
    }

    fn on_phase_complete(&mut self, report: &PhaseReport) {
        let status = match report.status {
            converge::PhaseStatus::Success => report.status.as_str().green(),
            converge::PhaseStatus::PartialFailure | converge::PhaseStatus::Cancelled => {
                report.status.as_str().yellow()
            }
            _ => report.status.as_str().red(),
        };
        self.println(format!("  {} {}", "→".dimmed(), status));
    }
}
