use anyhow::Result;
use colored::Colorize;
use converge::StepStatus;

use crate::Context;
use crate::cli::ApplyArgs;
use crate::orchestrator::{DeploymentReport, RunRequest};
use crate::paths;
use crate::progress::TerminalProgress;
use crate::ui;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<i32> {
    let orchestrator = super::orchestrator(ctx)?;
    if !args.dry_run && !paths::is_root() {
        ui::warn("Not running as root; host changes will likely fail with permission errors");
    }

    let request = RunRequest {
        phases: args.phases.phase_set(),
        force: args.force.into_iter().collect(),
        dry_run: args.dry_run,
    };
    let mut progress = TerminalProgress::new(ctx.quiet || ctx.json);
    let report = orchestrator.run(&request, &mut progress, &ctx.cancel)?;

    if ctx.json {
        super::print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(report.exit_code())
}

fn print_report(report: &DeploymentReport) {
    let title = if report.run.dry_run {
        format!("Dry run for {}", report.identity)
    } else {
        format!("Deployment {}", report.identity)
    };
    ui::header(&title);
    ui::kv("status", &ui::status(report.status).to_string());
    let applied = report
        .run
        .phases
        .iter()
        .flat_map(|p| p.steps.iter())
        .filter(|s| s.was_applied() && s.status == StepStatus::Succeeded)
        .count();
    ui::kv(
        "steps",
        &format!(
            "{} applied, {} failed, {} skipped",
            applied,
            report.run.count(StepStatus::Failed),
            report.run.count(StepStatus::Skipped)
        ),
    );

    let failures: Vec<_> = report
        .run
        .phases
        .iter()
        .flat_map(|p| p.steps.iter())
        .filter_map(|s| s.failure.as_ref().map(|f| (s, f)))
        .collect();
    if !failures.is_empty() {
        ui::section("Failures");
        for (step, failure) in failures {
            let hint = if failure.resumable {
                "re-run to resume".dimmed()
            } else {
                "fix the cause before re-running".red()
            };
            println!(
                "  {} {} [{}] {}",
                "✗".red(),
                step.id,
                failure.kind,
                failure.message
            );
            println!("      {hint}");
        }
    }

    if report.run.dry_run {
        ui::section("Would apply");
        let pending: Vec<_> = report
            .run
            .phases
            .iter()
            .flat_map(|p| p.steps.iter())
            .filter(|s| s.reason.as_deref() == Some("would apply"))
            .collect();
        if pending.is_empty() {
            ui::dim("nothing, every step is applied");
        }
        for step in pending {
            println!("  {} {} ({})", "•".blue(), step.id, step.phase);
        }
        return;
    }

    ui::section("Artifacts");
    for artifact in report.artifacts.iter().filter(|a| a.present) {
        let mode = if artifact.contains_secrets {
            artifact.mode.yellow()
        } else {
            artifact.mode.normal()
        };
        println!("  {} {}", mode, artifact.path.display());
    }

    if !report.credentials.is_empty() {
        ui::section("Credentials");
        for (key, masked) in &report.credentials {
            ui::kv(key, masked);
        }
        ui::dim("Run 'provision secrets --reveal' to show values");
    }

    if let Some(health) = &report.health {
        ui::section("Service health");
        for (service, status) in health {
            let state = if status.is_healthy() {
                status.state.to_string().green()
            } else {
                status.state.to_string().yellow()
            };
            ui::kv(service, &state.to_string());
        }
    }
}
