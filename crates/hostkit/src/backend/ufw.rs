//! Firewall backend using `ufw`.
//!
//! `set_rules` never disables the firewall. Desired rules are added and ufw
//! is enabled before stale rules are deleted, so a failure part way leaves
//! the previous policy in force plus some of the new allow rules.

use crate::backend::Firewall;
use crate::command::CommandRunner;
use crate::error::Result;
use crate::types::RuleSet;
use std::sync::Arc;

pub struct Ufw {
    runner: Arc<dyn CommandRunner>,
}

impl Ufw {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn ufw(&self, args: &[&str]) -> Result<String> {
        self.runner.run_checked("ufw", args, &[])
    }
}

impl Firewall for Ufw {
    fn set_rules(&self, rules: &RuleSet) -> Result<()> {
        self.ufw(&["default", "deny", "incoming"])?;
        self.ufw(&["default", "allow", "outgoing"])?;
        for rule in &rules.allow {
            let spec = rule.spec();
            match &rule.comment {
                Some(comment) => self.ufw(&["allow", &spec, "comment", comment])?,
                None => self.ufw(&["allow", &spec])?,
            };
        }
        self.ufw(&["--force", "enable"])?;

        let wanted = rules.specs();
        let status = parse_status(&self.ufw(&["status", "verbose"])?);
        for stale in status.allowed.iter().filter(|spec| !wanted.contains(spec)) {
            log::info!("Removing stale firewall rule {stale}");
            self.ufw(&["--force", "delete", "allow", stale])?;
        }

        log::info!("Firewall enabled with {} allow rule(s)", rules.allow.len());
        Ok(())
    }

    fn is_enforced(&self, rules: &RuleSet) -> Result<bool> {
        let status = parse_status(&self.ufw(&["status", "verbose"])?);
        Ok(status.active && status.deny_incoming && status.allowed == rules.specs())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct UfwStatus {
    active: bool,
    deny_incoming: bool,
    /// Sorted IPv4 `port/proto` allow rules
    allowed: Vec<String>,
}

fn parse_status(output: &str) -> UfwStatus {
    let mut status = UfwStatus::default();
    let mut in_rules = false;

    for line in output.lines().map(str::trim) {
        if let Some(value) = line.strip_prefix("Status:") {
            status.active = value.trim() == "active";
        } else if let Some(value) = line.strip_prefix("Default:") {
            status.deny_incoming = value.contains("deny (incoming)");
        } else if line.starts_with("--") {
            in_rules = true;
        } else if in_rules && !line.is_empty() && !line.contains("(v6)") && line.contains("ALLOW") {
            if let Some(spec) = line.split_whitespace().next() {
                status.allowed.push(spec.to_string());
            }
        }
    }

    status.allowed.sort();
    status.allowed.dedup();
    status
}
