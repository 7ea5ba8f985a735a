use anyhow::{Result, bail};
use dialoguer::Confirm;
use std::collections::BTreeMap;

use crate::Context;
use crate::cli::SecretsArgs;
use crate::ui;

pub fn run(ctx: &Context, args: SecretsArgs) -> Result<i32> {
    let orchestrator = super::orchestrator(ctx)?;
    let store = orchestrator.open_secrets()?;
    let identity = orchestrator.identity();

    if store.keys().is_empty() {
        ui::info(&format!(
            "No secrets generated for {identity} yet; run 'provision apply' first"
        ));
        return Ok(0);
    }

    if !args.reveal {
        let view = store.redacted_view();
        if ctx.json {
            super::print_json(&view)?;
        } else {
            ui::header(&format!("Credentials for {identity}"));
            for (key, masked) in &view {
                ui::kv(key, masked);
            }
            ui::dim(&format!("Stored in {}", store.path().display()));
        }
        return Ok(0);
    }

    if !args.yes {
        if ctx.json {
            bail!("--reveal with --json requires --yes");
        }
        let confirmed = Confirm::new()
            .with_prompt(format!("Print raw credentials for {identity}?"))
            .default(false)
            .interact()?;
        if !confirmed {
            ui::info("Cancelled");
            return Ok(0);
        }
    }

    let keys = store.keys();
    log::warn!(
        "Audit: revealing {} secret(s) for {}: {}",
        keys.len(),
        identity,
        keys.join(", ")
    );

    let values: BTreeMap<String, String> = store
        .export_env()
        .into_iter()
        .map(|(key, material)| (key, material.expose().to_string()))
        .collect();
    if ctx.json {
        super::print_json(&values)?;
    } else {
        for (key, value) in &values {
            println!("{key}={value}");
        }
    }
    Ok(0)
}
