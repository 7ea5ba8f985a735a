//! Orchestrator facade: install -> configure -> deploy, then health checks.
//!
//! One run holds the deployment lock for its whole duration. The returned
//! [`DeploymentReport`] carries masked credentials only; raw values are
//! reachable solely through [`Orchestrator::open_secrets`].

use anyhow::{Context, Result};
use converge::{
    Cancellation, Clock, DeploymentLock, ExecuteOptions, ExecutionEngine, ExecutionRecord, Phase,
    PhaseStatus, ProgressCallback, ProvisioningPlan, RecordStore, RunReport, StepRegistry,
    SystemClock,
};
use hostkit::HostAdapters;
use renderkit::FileMode;
use secretkit::SecretStore;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::health::{HealthStatus, HealthVerifier};
use crate::paths::StateLayout;
use crate::steps::{self, HostContext};
use crate::topology::{ArtifactPaths, ServiceTopology};

/// What to run
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub phases: BTreeSet<Phase>,
    pub force: BTreeSet<String>,
    pub dry_run: bool,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            phases: Phase::ALL.into_iter().collect(),
            force: BTreeSet::new(),
            dry_run: false,
        }
    }
}

/// Overall outcome, mapped onto the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Success,
    /// Some steps failed or were skipped; re-running resumes
    PartialFailure,
    Fatal,
    Cancelled,
    /// Deployed, but not every service turned healthy in time
    Unhealthy,
}

impl DeploymentStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::PartialFailure => 2,
            Self::Fatal => 3,
            Self::Unhealthy => 4,
            Self::Cancelled => 130,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialFailure => "partial failure",
            Self::Fatal => "fatal",
            Self::Cancelled => "cancelled",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PhaseStatus> for DeploymentStatus {
    fn from(status: PhaseStatus) -> Self {
        match status {
            PhaseStatus::Success => Self::Success,
            PhaseStatus::PartialFailure | PhaseStatus::NotAttempted => Self::PartialFailure,
            PhaseStatus::Fatal => Self::Fatal,
            PhaseStatus::Cancelled => Self::Cancelled,
        }
    }
}

/// A generated configuration file (never its contents)
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    pub path: PathBuf,
    pub mode: String,
    pub contains_secrets: bool,
    pub present: bool,
}

impl ArtifactSummary {
    fn new(path: PathBuf, mode: FileMode) -> Self {
        Self {
            present: path.exists(),
            mode: format!("{:04o}", mode.bits()),
            contains_secrets: mode == FileMode::Secret,
            path,
        }
    }
}

/// Final result of a run
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub identity: String,
    pub status: DeploymentStatus,
    #[serde(flatten)]
    pub run: RunReport,
    pub artifacts: Vec<ArtifactSummary>,
    /// Secret key -> mask
    pub credentials: BTreeMap<String, String>,
    /// Present when the deploy phase succeeded and health was checked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<BTreeMap<String, HealthStatus>>,
}

impl DeploymentReport {
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

/// Persisted state of a deployment, without running anything
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub identity: String,
    pub record_path: PathBuf,
    pub record: ExecutionRecord,
    /// Registered step ids in plan order, with their phase
    pub steps: Vec<(String, Phase)>,
    pub artifacts: Vec<ArtifactSummary>,
    pub credentials: BTreeMap<String, String>,
    pub deployed_current: bool,
}

/// Composes the step registry, engine and health verifier for one identity
pub struct Orchestrator {
    config: Config,
    layout: StateLayout,
    host: HostAdapters,
    clock: Arc<dyn Clock>,
    sshd_dropin: PathBuf,
}

impl Orchestrator {
    pub fn new(config: Config, state_root: &Path, host: HostAdapters) -> Self {
        let layout = StateLayout::new(state_root, &config.deployment.identity);
        Self {
            config,
            layout,
            host,
            clock: Arc::new(SystemClock::new()),
            sshd_dropin: PathBuf::from(steps::SSHD_DROPIN),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sshd_dropin(mut self, path: impl Into<PathBuf>) -> Self {
        self.sshd_dropin = path.into();
        self
    }

    pub fn identity(&self) -> &str {
        &self.config.deployment.identity
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    /// Open the secret store for raw access.
    ///
    /// Callers outside a run must log an audit line before exposing values.
    pub fn open_secrets(&self) -> Result<SecretStore> {
        SecretStore::open(self.layout.secrets(), self.identity())
            .with_context(|| format!("Could not open secrets for {}", self.identity()))
    }

    fn context(&self, secrets: Arc<SecretStore>) -> Result<Arc<HostContext>> {
        Ok(Arc::new(HostContext {
            host: self.host.clone(),
            topology: ServiceTopology::standard(&self.config),
            artifacts: ArtifactPaths::new(&self.config.output_dir()),
            sshd_dropin: self.sshd_dropin.clone(),
            renderer: steps::renderer().context("Invalid built-in template")?,
            config: self.config.clone(),
            secrets,
        }))
    }

    fn registry(&self, ctx: &Arc<HostContext>) -> StepRegistry {
        let mut registry = StepRegistry::new();
        steps::register_all(&mut registry, ctx);
        registry
    }

    /// Build the plan for `phases` without touching the host
    pub fn plan(&self, phases: &BTreeSet<Phase>) -> Result<ProvisioningPlan> {
        let ctx = self.context(Arc::new(self.open_secrets()?))?;
        Ok(self.registry(&ctx).build_plan(phases)?)
    }

    /// Run the requested phases, then verify service health after deploy
    pub fn run<P: ProgressCallback>(
        &self,
        request: &RunRequest,
        progress: &mut P,
        cancel: &Cancellation,
    ) -> Result<DeploymentReport> {
        let _lock = DeploymentLock::acquire(&self.layout.lock(), self.identity())?;

        let secrets = Arc::new(self.open_secrets()?);
        let ctx = self.context(secrets.clone())?;
        let plan = self.registry(&ctx).build_plan(&request.phases)?;
        log::info!(
            "Plan for {}: {} step(s) in {}",
            self.identity(),
            plan.len(),
            request
                .phases
                .iter()
                .map(Phase::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let options = ExecuteOptions {
            dry_run: request.dry_run,
            force: request.force.clone(),
            retry: self.config.retry.to_retry_config(),
        };
        let redactor = secrets.clone();
        let engine = ExecutionEngine::new(
            self.identity(),
            RecordStore::new(self.layout.record()),
            options,
        )
        .with_clock(self.clock.clone())
        .with_redactor(move |text| redactor.redact(text));

        let run = engine.run(&plan, progress, cancel)?;
        let mut status = DeploymentStatus::from(run.status());

        let deployed = run
            .phase(Phase::Deploy)
            .is_some_and(|p| p.status.is_success());
        let health = if deployed && !request.dry_run {
            let verifier =
                HealthVerifier::new(self.host.containers.clone(), &ctx.topology.project, self.clock.clone())
                    .with_cancellation(cancel.clone());
            let health = verifier.wait_until_ready(
                &ctx.topology.service_names(),
                self.config.health.timeout(),
                self.config.health.poll_interval(),
            );
            if !health.values().all(HealthStatus::is_healthy) {
                status = if cancel.is_cancelled() {
                    DeploymentStatus::Cancelled
                } else {
                    DeploymentStatus::Unhealthy
                };
            }
            Some(health)
        } else {
            None
        };

        Ok(DeploymentReport {
            identity: self.identity().to_string(),
            status,
            run,
            artifacts: artifact_summaries(&ctx),
            credentials: secrets.redacted_view(),
            health,
        })
    }

    /// The execution record as last persisted
    pub fn record(&self) -> Result<ExecutionRecord> {
        Ok(RecordStore::new(self.layout.record()).load(self.identity())?)
    }

    /// Recorded state, artifacts and masked credentials
    pub fn status(&self) -> Result<StatusReport> {
        let store = RecordStore::new(self.layout.record());
        let record = store.load(self.identity())?;
        let secrets = Arc::new(self.open_secrets()?);
        let ctx = self.context(secrets.clone())?;
        let plan = self
            .registry(&ctx)
            .build_plan(&Phase::ALL.into_iter().collect())?;

        Ok(StatusReport {
            identity: self.identity().to_string(),
            record_path: store.path().to_path_buf(),
            record,
            steps: plan
                .steps()
                .iter()
                .map(|s| (s.id().to_string(), s.phase()))
                .collect(),
            artifacts: artifact_summaries(&ctx),
            credentials: secrets.redacted_view(),
            deployed_current: steps::is_deployed_current(&ctx),
        })
    }
}

fn artifact_summaries(ctx: &HostContext) -> Vec<ArtifactSummary> {
    let mut artifacts = vec![
        ArtifactSummary::new(ctx.artifacts.compose(), FileMode::Public),
        ArtifactSummary::new(ctx.artifacts.proxy(), FileMode::Public),
    ];
    artifacts.extend(
        ctx.topology
            .env_services()
            .filter_map(|s| ctx.artifacts.env_file(s))
            .map(|path| ArtifactSummary::new(path, FileMode::Secret)),
    );
    artifacts.push(ArtifactSummary::new(ctx.sshd_dropin.clone(), FileMode::Public));
    artifacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeHost, IDENTITY, test_config};
    use converge::{ManualClock, NoProgress, StepStatus};
    use hostkit::ErrorCategory;
    use tempfile::TempDir;

    struct Setup {
        dir: TempDir,
        host: Arc<FakeHost>,
        clock: Arc<ManualClock>,
    }

    impl Setup {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let topology = ServiceTopology::standard(&test_config(dir.path()));
            Self {
                host: Arc::new(FakeHost::new(topology.service_names())),
                clock: Arc::new(ManualClock::new()),
                dir,
            }
        }

        fn orchestrator(&self) -> Orchestrator {
            let mut config = test_config(self.dir.path());
            config.health.timeout_secs = 60;
            Orchestrator::new(config, &self.dir.path().join("state"), self.host.adapters())
                .with_clock(self.clock.clone())
                .with_sshd_dropin(self.dir.path().join("sshd").join("60-provision.conf"))
        }

        fn run(&self, request: &RunRequest) -> DeploymentReport {
            self.orchestrator()
                .run(request, &mut NoProgress, &Cancellation::new())
                .unwrap()
        }
    }

    #[test]
    fn test_full_run_reports_success_and_masks_credentials() {
        let setup = Setup::new();
        let report = setup.run(&RunRequest::default());

        assert_eq!(report.status, DeploymentStatus::Success, "{report:?}");
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.identity, IDENTITY);
        assert_eq!(report.credentials.len(), 6);
        assert!(report.credentials.values().all(|v| v == secretkit::MASK));
        let health = report.health.as_ref().unwrap();
        assert!(health.values().all(HealthStatus::is_healthy));
        assert!(report.artifacts.iter().all(|a| a.present));

        // No raw secret anywhere in the serialized report
        let json = serde_json::to_string(&report).unwrap();
        let secrets = setup.orchestrator().open_secrets().unwrap();
        for material in secrets.export_env().values() {
            assert!(!json.contains(material.expose()));
        }
    }

    #[test]
    fn test_secrets_survive_reruns() {
        let setup = Setup::new();
        setup.run(&RunRequest::default());
        let first = setup.orchestrator().open_secrets().unwrap().get("admin_password").unwrap();

        let request = RunRequest {
            force: BTreeSet::from(["secrets.generate".to_string()]),
            ..Default::default()
        };
        setup.run(&request);
        let second = setup.orchestrator().open_secrets().unwrap().get("admin_password").unwrap();
        assert_eq!(first.expose(), second.expose());
    }

    #[test]
    fn test_partial_failure_exit_code_and_resume() {
        let setup = Setup::new();
        setup.host.fail_next("install", ErrorCategory::Permission, 1);

        let first = setup.run(&RunRequest::default());
        assert_eq!(first.status, DeploymentStatus::PartialFailure);
        assert_eq!(first.exit_code(), 2);
        assert!(first.health.is_none());
        assert_eq!(first.run.count(StepStatus::Failed), 1);
        let failed = first.run.phases[0].failed_steps().next().unwrap();
        assert!(failed.failure.as_ref().unwrap().resumable);

        let second = setup.run(&RunRequest::default());
        assert_eq!(second.status, DeploymentStatus::Success, "{second:?}");
        assert!(!second.run.step("packages.index").unwrap().was_applied());
        assert!(second.run.step(&failed.id).unwrap().was_applied());
    }

    #[test]
    fn test_unhealthy_service_after_timeout() {
        let setup = Setup::new();
        setup.host.with_state(|s| {
            s.unhealthy.insert("cache".to_string());
        });

        let report = setup.run(&RunRequest::default());
        assert_eq!(report.status, DeploymentStatus::Unhealthy);
        assert_eq!(report.exit_code(), 4);
        assert!(report.run.is_success());
        let health = report.health.as_ref().unwrap();
        assert!(health["db"].is_healthy());
        assert_eq!(health["cache"].state, crate::health::HealthState::Unhealthy);
        assert_eq!(setup.clock.elapsed(), std::time::Duration::from_secs(60));
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let setup = Setup::new();
        let request = RunRequest {
            dry_run: true,
            ..Default::default()
        };
        let report = setup.run(&request);
        assert!(report.run.dry_run);
        assert_eq!(report.run.apply_count(), 0);
        assert!(report.health.is_none());
        assert!(setup.host.calls().is_empty());

        let layout = setup.orchestrator().layout().clone();
        assert!(!layout.record().exists());
        assert!(!layout.secrets().exists());
        assert_eq!(DeploymentLock::holder(&layout.lock()).unwrap(), None);
        assert!(report.artifacts.iter().all(|a| !a.present));
    }

    #[test]
    fn test_concurrent_run_is_locked_out() {
        let setup = Setup::new();
        let orchestrator = setup.orchestrator();
        let _held = DeploymentLock::acquire(&orchestrator.layout().lock(), IDENTITY).unwrap();

        let err = orchestrator
            .run(&RunRequest::default(), &mut NoProgress, &Cancellation::new())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<converge::Error>(),
            Some(converge::Error::Locked { .. })
        ));
    }

    #[test]
    fn test_unknown_forced_step_is_error() {
        let setup = Setup::new();
        let request = RunRequest {
            force: BTreeSet::from(["nope".to_string()]),
            ..Default::default()
        };
        let err = setup
            .orchestrator()
            .run(&request, &mut NoProgress, &Cancellation::new())
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let setup = Setup::new();
        let cancel = Cancellation::new();
        cancel.cancel();
        let report = setup
            .orchestrator()
            .run(&RunRequest::default(), &mut NoProgress, &cancel)
            .unwrap();
        assert_eq!(report.status, DeploymentStatus::Cancelled);
        assert_eq!(report.exit_code(), 130);
        assert_eq!(
            report.run.step("packages.index").unwrap().status,
            StepStatus::Pending
        );
    }

    #[test]
    fn test_status_reflects_record() {
        let setup = Setup::new();
        setup.run(&RunRequest::default());
        let status = setup.orchestrator().status().unwrap();
        assert_eq!(status.steps.len(), 12);
        assert!(status.deployed_current);
        assert_eq!(status.record.status("containers.up"), StepStatus::Succeeded);
        assert_eq!(status.credentials.len(), 6);
    }
}
