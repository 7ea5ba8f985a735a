//! Install phase: package lists, packages and the container runtime service.

use converge::{ApplyContext, Phase, Step, StepError, StepRegistry};
use std::sync::Arc;

use super::HostContext;

const RUNTIME_UNIT: &str = "docker";

pub(super) fn register(registry: &mut StepRegistry, ctx: &Arc<HostContext>) {
    registry
        .register(PackageIndex { ctx: ctx.clone() })
        .register(Packages {
            ctx: ctx.clone(),
            id: "packages.base",
            set: PackageSet::Base,
        })
        .register(Packages {
            ctx: ctx.clone(),
            id: "packages.container-runtime",
            set: PackageSet::ContainerRuntime,
        })
        .register(RuntimeService { ctx: ctx.clone() });
}

/// Refresh package lists when they are older than the configured age
#[derive(Debug)]
struct PackageIndex {
    ctx: Arc<HostContext>,
}

impl Step for PackageIndex {
    fn id(&self) -> &str {
        "packages.index"
    }

    fn description(&self) -> String {
        "Refresh package lists".to_string()
    }

    fn phase(&self) -> Phase {
        Phase::Install
    }

    fn is_applied(&self) -> Result<bool, StepError> {
        let max_age = self.ctx.config.packages.max_index_age();
        Ok(self
            .ctx
            .host
            .packages
            .index_age()?
            .is_some_and(|age| age <= max_age))
    }

    fn apply(&self, _ctx: &ApplyContext) -> Result<(), StepError> {
        self.ctx.host.packages.update_index()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum PackageSet {
    Base,
    ContainerRuntime,
}

#[derive(Debug)]
struct Packages {
    ctx: Arc<HostContext>,
    id: &'static str,
    set: PackageSet,
}

impl Packages {
    fn wanted(&self) -> &[String] {
        let packages = &self.ctx.config.packages;
        match self.set {
            PackageSet::Base => &packages.base,
            PackageSet::ContainerRuntime => &packages.container_runtime,
        }
    }

    fn missing(&self) -> Result<Vec<String>, StepError> {
        let mut missing = Vec::new();
        for package in self.wanted() {
            if !self.ctx.host.packages.is_installed(package)? {
                missing.push(package.clone());
            }
        }
        Ok(missing)
    }
}

impl Step for Packages {
    fn id(&self) -> &str {
        self.id
    }

    fn description(&self) -> String {
        format!("Install {}", self.wanted().join(", "))
    }

    fn phase(&self) -> Phase {
        Phase::Install
    }

    fn depends_on(&self) -> Vec<String> {
        vec!["packages.index".to_string()]
    }

    fn is_applied(&self) -> Result<bool, StepError> {
        Ok(self.missing()?.is_empty())
    }

    fn apply(&self, _ctx: &ApplyContext) -> Result<(), StepError> {
        let missing = self.missing()?;
        if missing.is_empty() {
            return Ok(());
        }
        log::info!("Installing {} package(s): {}", missing.len(), missing.join(" "));
        self.ctx.host.packages.install(&missing)?;
        Ok(())
    }
}

/// Container runtime enabled at boot, running, with compose available
#[derive(Debug)]
struct RuntimeService {
    ctx: Arc<HostContext>,
}

impl Step for RuntimeService {
    fn id(&self) -> &str {
        "service.container-runtime"
    }

    fn description(&self) -> String {
        format!("Enable and start {RUNTIME_UNIT}")
    }

    fn phase(&self) -> Phase {
        Phase::Install
    }

    fn depends_on(&self) -> Vec<String> {
        vec!["packages.container-runtime".to_string()]
    }

    fn is_applied(&self) -> Result<bool, StepError> {
        let host = &self.ctx.host;
        Ok(host.services.is_enabled(RUNTIME_UNIT)?
            && host.services.is_active(RUNTIME_UNIT)?
            && host.containers.is_available())
    }

    fn apply(&self, _ctx: &ApplyContext) -> Result<(), StepError> {
        self.ctx.host.services.enable_now(RUNTIME_UNIT)?;
        if !self.ctx.host.containers.is_available() {
            // Daemon may still be starting
            return Err(StepError::transient("container runtime is not responding yet"));
        }
        Ok(())
    }
}
