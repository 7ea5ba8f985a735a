//! Intrusion prevention backend using fail2ban.
//!
//! Each jail is a drop-in `<service>.local` file under `jail.d`, written
//! atomically, followed by a `fail2ban-client reload`.

use crate::backend::IntrusionPrevention;
use crate::command::CommandRunner;
use crate::error::Result;
use crate::types::JailPolicy;
use renderkit::{FileMode, WriteOutcome};
use std::path::PathBuf;
use std::sync::Arc;

pub struct Fail2ban {
    runner: Arc<dyn CommandRunner>,
    jail_dir: PathBuf,
}

impl Fail2ban {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            jail_dir: PathBuf::from("/etc/fail2ban/jail.d"),
        }
    }

    pub fn with_jail_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.jail_dir = dir.into();
        self
    }

    fn jail_path(&self, service: &str) -> PathBuf {
        self.jail_dir.join(format!("{service}.local"))
    }
}

/// Drop-in jail definition
pub fn jail_config(service: &str, policy: &JailPolicy) -> String {
    format!(
        "# Managed by provision; local edits are overwritten\n\
         [{service}]\n\
         enabled = true\n\
         port = {}\n\
         maxretry = {}\n\
         findtime = {}\n\
         bantime = {}\n",
        policy.port, policy.max_retry, policy.find_time_secs, policy.ban_time_secs
    )
}

impl IntrusionPrevention for Fail2ban {
    fn configure_jail(&self, service: &str, policy: &JailPolicy) -> Result<()> {
        let path = self.jail_path(service);
        let outcome = renderkit::write_atomic(&path, jail_config(service, policy).as_bytes(), FileMode::Public)?;
        if outcome == WriteOutcome::Unchanged {
            log::debug!("Jail {} unchanged", service);
        }
        self.runner.run_checked("fail2ban-client", &["reload"], &[])?;
        Ok(())
    }

    fn jail_active(&self, service: &str, policy: &JailPolicy) -> Result<bool> {
        let expected = jail_config(service, policy);
        if !renderkit::is_current(&self.jail_path(service), expected.as_bytes(), FileMode::Public) {
            return Ok(false);
        }
        let output = self
            .runner
            .run("fail2ban-client", &["status", service], &[])?;
        Ok(output.success())
    }
}
