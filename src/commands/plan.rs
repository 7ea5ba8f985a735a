use anyhow::Result;
use colored::Colorize;
use converge::{Phase, StepStatus};
use serde::Serialize;

use crate::Context;
use crate::cli::PhaseArgs;
use crate::ui;

#[derive(Debug, Serialize)]
struct PlannedStep {
    id: String,
    phase: Phase,
    description: String,
    depends_on: Vec<String>,
    recorded: StepStatus,
}

/// List the ordered steps of the requested phases with their recorded status
pub fn run(ctx: &Context, args: PhaseArgs) -> Result<i32> {
    let orchestrator = super::orchestrator(ctx)?;
    let plan = orchestrator.plan(&args.phase_set())?;
    let record = orchestrator.record()?;

    let steps: Vec<PlannedStep> = plan
        .steps()
        .iter()
        .map(|step| PlannedStep {
            id: step.id().to_string(),
            phase: step.phase(),
            description: step.description(),
            depends_on: step.depends_on(),
            recorded: record.status(step.id()),
        })
        .collect();

    if ctx.json {
        super::print_json(&steps)?;
        return Ok(0);
    }

    ui::header(&format!("Plan for {}", orchestrator.identity()));
    for phase in plan.phases() {
        ui::section(&format!("Phase: {phase}"));
        for (i, step) in steps.iter().filter(|s| s.phase == phase).enumerate() {
            let status = match step.recorded {
                StepStatus::Succeeded => step.recorded.as_str().green(),
                StepStatus::Failed => step.recorded.as_str().red(),
                StepStatus::Skipped => step.recorded.as_str().yellow(),
                _ => step.recorded.as_str().dimmed(),
            };
            println!(
                "  {} {} {} {}",
                format!("{}.", i + 1).bold(),
                step.id,
                format!("[{status}]").dimmed(),
                step.description.dimmed()
            );
            if !step.depends_on.is_empty() {
                ui::dim(&format!("   after {}", step.depends_on.join(", ")));
            }
        }
    }
    println!();
    ui::info("Run 'provision apply --dry-run' to evaluate which steps would change the host");
    Ok(0)
}
