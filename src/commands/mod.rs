pub mod apply;
pub mod doctor;
pub mod plan;
pub mod secrets;
pub mod status;

use anyhow::{Context as _, Result};
use hostkit::HostAdapters;
use serde::Serialize;

use crate::Context;
use crate::config::{self, Config};
use crate::orchestrator::Orchestrator;
use crate::paths;

/// Load the configuration and apply command-line overrides
pub fn load_config(ctx: &Context) -> Result<Config> {
    let (mut config, path) = Config::load(ctx.config.as_deref())?;
    if let Some(target) = &ctx.target {
        config::validate_identity(target)?;
        config.deployment.identity = target.clone();
    }
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

/// Orchestrator for the configured identity on the real host
pub fn orchestrator(ctx: &Context) -> Result<Orchestrator> {
    let config = load_config(ctx)?;
    let state_root = paths::state_dir()?;
    log::debug!(
        "Deployment {} with state under {}",
        config.deployment.identity,
        state_root.display()
    );
    Ok(Orchestrator::new(config, &state_root, HostAdapters::system()))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value).context("Failed to serialize report")?;
    println!("{content}");
    Ok(())
}
