//! systemd backend using `systemctl`.

use crate::backend::ServiceManager;
use crate::command::CommandRunner;
use crate::error::Result;
use std::sync::Arc;

pub struct Systemd {
    runner: Arc<dyn CommandRunner>,
}

impl Systemd {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl ServiceManager for Systemd {
    fn enable_now(&self, unit: &str) -> Result<()> {
        self.runner
            .run_checked("systemctl", &["enable", "--now", unit], &[])?;
        Ok(())
    }

    fn reload(&self, unit: &str) -> Result<()> {
        self.runner
            .run_checked("systemctl", &["reload-or-restart", unit], &[])?;
        Ok(())
    }

    fn is_active(&self, unit: &str) -> Result<bool> {
        let output = self
            .runner
            .run("systemctl", &["is-active", "--quiet", unit], &[])?;
        Ok(output.success())
    }

    fn is_enabled(&self, unit: &str) -> Result<bool> {
        let output = self
            .runner
            .run("systemctl", &["is-enabled", "--quiet", unit], &[])?;
        Ok(output.success())
    }
}
