use anyhow::Result;
use colored::Colorize;
use converge::{DeploymentLock, StepStatus};

use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<i32> {
    let orchestrator = super::orchestrator(ctx)?;
    let status = orchestrator.status()?;

    if ctx.json {
        super::print_json(&status)?;
        return Ok(0);
    }

    ui::header(&format!("Deployment {}", status.identity));
    ui::kv("record", &status.record_path.display().to_string());
    if status.record.steps.is_empty() {
        ui::kv("last run", &"never".dimmed().to_string());
    } else {
        ui::kv("last run", &status.record.last_updated.to_rfc3339());
    }
    let deployed = if status.deployed_current {
        "current".green()
    } else {
        "stale or not deployed".yellow()
    };
    ui::kv("containers", &deployed.to_string());
    let lock = orchestrator.layout().lock();
    if let Some(holder) = DeploymentLock::holder(&lock)? {
        ui::warn(&format!("A run holds the lock {} ({holder})", lock.display()));
    }

    let mut phase = None;
    for (id, step_phase) in &status.steps {
        if phase != Some(*step_phase) {
            ui::section(&format!("Phase: {step_phase}"));
            phase = Some(*step_phase);
        }
        let entry = status.record.get(id);
        let state = status.record.status(id);
        let symbol = match state {
            StepStatus::Succeeded => "✓".green(),
            StepStatus::Failed => "✗".red(),
            StepStatus::Skipped => "⊘".yellow(),
            StepStatus::Pending => "○".dimmed(),
        };
        let detail = entry
            .and_then(|e| e.last_error.as_deref())
            .map(|e| format!(" {}", e.dimmed()))
            .unwrap_or_default();
        println!("  {} {}{}", symbol, id, detail);
    }

    ui::section("Artifacts");
    for artifact in &status.artifacts {
        let marker = if artifact.present {
            "✓".green()
        } else {
            "○".dimmed()
        };
        println!("  {} {} {}", marker, artifact.mode, artifact.path.display());
    }

    if !status.credentials.is_empty() {
        ui::section("Credentials");
        for (key, masked) in &status.credentials {
            ui::kv(key, masked);
        }
    }
    Ok(0)
}
