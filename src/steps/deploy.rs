//! Deploy phase: bring the rendered topology up.
//!
//! After a successful `compose up` a stamp holding the blake3 hash of every
//! rendered artifact is written next to them. The step counts as applied
//! while the stamp matches the artifacts on disk and every service runs, so
//! re-rendered configuration or a stopped container triggers a redeploy.

use converge::{ApplyContext, Phase, Step, StepError, StepRegistry};
use hostkit::ServiceState;
use renderkit::FileMode;
use std::path::PathBuf;
use std::sync::Arc;

use super::HostContext;

pub(super) fn register(registry: &mut StepRegistry, ctx: &Arc<HostContext>) {
    registry.register(ContainersUp { ctx: ctx.clone() });
}

fn stamp_path(ctx: &HostContext) -> PathBuf {
    ctx.artifacts.root.join(".deployed")
}

/// Hash of the artifacts `compose up` consumes
fn deployment_stamp(ctx: &HostContext) -> String {
    let mut files = vec![ctx.artifacts.compose(), ctx.artifacts.proxy()];
    files.extend(
        ctx.topology
            .env_services()
            .filter_map(|s| ctx.artifacts.env_file(s)),
    );
    files.sort();

    let mut hasher = blake3::Hasher::new();
    for file in &files {
        hasher.update(file.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        match std::fs::read(file) {
            Ok(bytes) => {
                hasher.update(&(bytes.len() as u64).to_le_bytes());
                hasher.update(&bytes);
            }
            Err(_) => {
                hasher.update(b"<missing>");
            }
        }
    }
    format!("{}\n", hasher.finalize().to_hex())
}

/// Whether the stamp on disk matches the current artifacts
pub fn is_deployed_current(ctx: &HostContext) -> bool {
    std::fs::read_to_string(stamp_path(ctx)).is_ok_and(|s| s == deployment_stamp(ctx))
}

#[derive(Debug)]
struct ContainersUp {
    ctx: Arc<HostContext>,
}

impl ContainersUp {
    fn stopped_services(&self) -> Result<Vec<String>, StepError> {
        let mut stopped = Vec::new();
        for name in self.ctx.topology.service_names() {
            let state = self
                .ctx
                .host
                .containers
                .service_status(&self.ctx.topology.project, &name)?;
            if state != ServiceState::Running {
                log::debug!("Service {} is {:?}", name, state);
                stopped.push(name);
            }
        }
        Ok(stopped)
    }
}

impl Step for ContainersUp {
    fn id(&self) -> &str {
        "containers.up"
    }

    fn description(&self) -> String {
        format!(
            "Start {} services ({})",
            self.ctx.topology.services.len(),
            self.ctx.topology.service_names().join(", ")
        )
    }

    fn phase(&self) -> Phase {
        Phase::Deploy
    }

    fn depends_on(&self) -> Vec<String> {
        [
            "service.container-runtime",
            "render.env",
            "render.topology",
            "render.proxy",
        ]
        .map(String::from)
        .to_vec()
    }

    fn is_applied(&self) -> Result<bool, StepError> {
        if !is_deployed_current(&self.ctx) {
            return Ok(false);
        }
        Ok(self.stopped_services()?.is_empty())
    }

    fn apply(&self, _ctx: &ApplyContext) -> Result<(), StepError> {
        let compose = self.ctx.artifacts.compose();
        self.ctx
            .host
            .containers
            .apply_topology(&compose, &self.ctx.topology.project)?;
        renderkit::write_atomic(
            &stamp_path(&self.ctx),
            deployment_stamp(&self.ctx).as_bytes(),
            FileMode::Public,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, run_phases};
    use converge::{PhaseStatus, StepStatus};

    #[test]
    fn test_full_run_deploys_once() {
        let fx = fixture();
        let report = run_phases(&fx, &Phase::ALL);
        assert_eq!(report.status(), PhaseStatus::Success, "{report:?}");
        assert!(is_deployed_current(&fx.ctx));
        assert_eq!(fx.host.state().deploys, 1);

        let again = run_phases(&fx, &Phase::ALL);
        assert_eq!(again.apply_count(), 0);
        assert_eq!(fx.host.state().deploys, 1);
    }

    #[test]
    fn test_stopped_container_triggers_redeploy() {
        let fx = fixture();
        run_phases(&fx, &Phase::ALL);
        fx.host.with_state(|s| {
            s.running.remove("cache");
        });

        let report = run_phases(&fx, &[Phase::Deploy]);
        assert!(report.step("containers.up").unwrap().was_applied());
        assert_eq!(fx.host.state().deploys, 2);
    }

    #[test]
    fn test_changed_artifact_invalidates_stamp() {
        let fx = fixture();
        run_phases(&fx, &Phase::ALL);
        let before = deployment_stamp(&fx.ctx);
        std::fs::write(fx.ctx.artifacts.proxy(), "# edited by hand\n").unwrap();
        assert_ne!(deployment_stamp(&fx.ctx), before);
        assert!(!is_deployed_current(&fx.ctx));
    }

    #[test]
    fn test_deploy_not_attempted_after_configure_failure() {
        let fx = fixture();
        fx.host
            .fail_next("set_rules", hostkit::ErrorCategory::InvalidConfig, 1);
        let report = run_phases(&fx, &Phase::ALL);
        assert_eq!(
            report.phase(Phase::Configure).unwrap().status,
            PhaseStatus::Fatal
        );
        assert_eq!(
            report.phase(Phase::Deploy).unwrap().status,
            PhaseStatus::NotAttempted
        );
        assert_eq!(
            report.step("containers.up").unwrap().status,
            StepStatus::Pending
        );
        assert_eq!(fx.host.state().deploys, 0);
    }
}
