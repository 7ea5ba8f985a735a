//! In-memory host adapters and fixtures for tests.

use converge::{
    Cancellation, ExecuteOptions, ExecutionEngine, ManualClock, NoProgress, Phase, RecordStore,
    RunReport, StepRegistry,
};
use hostkit::{
    ContainerRuntime, ErrorCategory, Firewall, HostAdapters, IntrusionPrevention, JailPolicy,
    PackageManager, ProbeResult, RuleSet, ServiceManager, ServiceState,
};
use secretkit::SecretStore;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;

use crate::config::Config;
use crate::paths::StateLayout;
use crate::steps::{self, HostContext};
use crate::topology::{ArtifactPaths, ServiceTopology};

pub const IDENTITY: &str = "test-host";

#[derive(Debug, Default)]
pub struct FakeState {
    pub index_fresh: bool,
    pub installed: BTreeSet<String>,
    pub enabled: BTreeSet<String>,
    pub active: BTreeSet<String>,
    pub rules: Option<RuleSet>,
    pub jails: BTreeMap<String, JailPolicy>,
    pub services: Vec<String>,
    pub running: BTreeSet<String>,
    /// Running services whose probe reports unhealthy
    pub unhealthy: BTreeSet<String>,
    pub deploys: u32,
    pub calls: Vec<String>,
    failures: BTreeMap<String, (ErrorCategory, u32)>,
}

/// Host whose packages, units, firewall, jails and containers live in memory
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<FakeState>,
}

impl FakeHost {
    pub fn new(services: Vec<String>) -> Self {
        let host = Self::default();
        host.with_state(|s| s.services = services);
        host
    }

    pub fn adapters(self: &Arc<Self>) -> HostAdapters {
        HostAdapters {
            packages: self.clone(),
            services: self.clone(),
            containers: self.clone(),
            firewall: self.clone(),
            jails: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.lock()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Make the next `times` calls of `op` fail with `category`
    pub fn fail_next(&self, op: &str, category: ErrorCategory, times: u32) {
        self.lock().failures.insert(op.to_string(), (category, times));
    }

    /// Record a mutating call, failing it if a failure is queued
    fn call(&self, op: &str, detail: &str) -> hostkit::Result<MutexGuard<'_, FakeState>> {
        let mut state = self.lock();
        let line = if detail.is_empty() {
            op.to_string()
        } else {
            format!("{op} {detail}")
        };
        state.calls.push(line);
        if let Some((category, remaining)) = state.failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(hostkit::Error::Command {
                    tool: "fake".to_string(),
                    category: *category,
                    message: format!("{op} failed"),
                });
            }
        }
        Ok(state)
    }
}

impl PackageManager for FakeHost {
    fn update_index(&self) -> hostkit::Result<()> {
        self.call("update_index", "")?.index_fresh = true;
        Ok(())
    }

    fn index_age(&self) -> hostkit::Result<Option<Duration>> {
        Ok(self.lock().index_fresh.then(|| Duration::from_secs(60)))
    }

    fn install(&self, packages: &[String]) -> hostkit::Result<()> {
        let mut state = self.call("install", &packages.join(" "))?;
        state.installed.extend(packages.iter().cloned());
        Ok(())
    }

    fn is_installed(&self, package: &str) -> hostkit::Result<bool> {
        Ok(self.lock().installed.contains(package))
    }
}

impl ServiceManager for FakeHost {
    fn enable_now(&self, unit: &str) -> hostkit::Result<()> {
        let mut state = self.call("enable_now", unit)?;
        state.enabled.insert(unit.to_string());
        state.active.insert(unit.to_string());
        Ok(())
    }

    fn reload(&self, unit: &str) -> hostkit::Result<()> {
        drop(self.call("reload", unit)?);
        Ok(())
    }

    fn is_active(&self, unit: &str) -> hostkit::Result<bool> {
        Ok(self.lock().active.contains(unit))
    }

    fn is_enabled(&self, unit: &str) -> hostkit::Result<bool> {
        Ok(self.lock().enabled.contains(unit))
    }
}

impl ContainerRuntime for FakeHost {
    fn is_available(&self) -> bool {
        self.lock().active.contains("docker")
    }

    fn apply_topology(&self, compose_file: &Path, project: &str) -> hostkit::Result<()> {
        let mut state = self.call("apply_topology", project)?;
        assert!(compose_file.exists(), "compose file must be rendered first");
        state.running = state.services.iter().cloned().collect();
        state.deploys += 1;
        Ok(())
    }

    fn service_status(&self, _project: &str, service: &str) -> hostkit::Result<ServiceState> {
        Ok(if self.lock().running.contains(service) {
            ServiceState::Running
        } else {
            ServiceState::Missing
        })
    }

    fn health_probe(&self, _project: &str, service: &str) -> hostkit::Result<ProbeResult> {
        let state = self.lock();
        Ok(if !state.running.contains(service) {
            ProbeResult::Unknown
        } else if state.unhealthy.contains(service) {
            ProbeResult::Unhealthy
        } else {
            ProbeResult::Healthy
        })
    }
}

impl Firewall for FakeHost {
    fn set_rules(&self, rules: &RuleSet) -> hostkit::Result<()> {
        self.call("set_rules", &rules.specs().join(" "))?.rules = Some(rules.clone());
        Ok(())
    }

    fn is_enforced(&self, rules: &RuleSet) -> hostkit::Result<bool> {
        Ok(self.lock().rules.as_ref() == Some(rules))
    }
}

impl IntrusionPrevention for FakeHost {
    fn configure_jail(&self, service: &str, policy: &JailPolicy) -> hostkit::Result<()> {
        self.call("configure_jail", service)?
            .jails
            .insert(service.to_string(), policy.clone());
        Ok(())
    }

    fn jail_active(&self, service: &str, policy: &JailPolicy) -> hostkit::Result<bool> {
        Ok(self.lock().jails.get(service) == Some(policy))
    }
}

// ============================================================================
// Fixture
// ============================================================================

pub struct Fixture {
    pub dir: TempDir,
    pub host: Arc<FakeHost>,
    pub ctx: Arc<HostContext>,
    pub clock: Arc<ManualClock>,
    pub layout: StateLayout,
}

impl Fixture {
    pub fn state_root(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    /// Run the install phase so configure steps find their dependencies
    pub fn mark_installed(&self) {
        let report = run_phases(self, &[Phase::Install]);
        assert!(report.is_success(), "{report:?}");
    }
}

/// Config rooted in `dir`
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.deployment.identity = IDENTITY.to_string();
    config.deployment.output_dir = Some(dir.join("opt").to_string_lossy().into_owned());
    config
}

pub fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let topology = ServiceTopology::standard(&config);
    let host = Arc::new(FakeHost::new(topology.service_names()));
    let layout = StateLayout::new(&dir.path().join("state"), IDENTITY);
    let secrets = Arc::new(SecretStore::open(layout.secrets(), IDENTITY).unwrap());

    let ctx = Arc::new(HostContext {
        host: host.adapters(),
        artifacts: ArtifactPaths::new(&config.output_dir()),
        sshd_dropin: dir.path().join("sshd_config.d").join("60-provision.conf"),
        renderer: steps::renderer().unwrap(),
        config,
        topology,
        secrets,
    });

    Fixture {
        dir,
        host,
        ctx,
        clock: Arc::new(ManualClock::new()),
        layout,
    }
}

/// Run the given phases against the fixture with virtual-time retries
pub fn run_phases(fx: &Fixture, phases: &[Phase]) -> RunReport {
    let mut registry = StepRegistry::new();
    steps::register_all(&mut registry, &fx.ctx);
    let plan = registry
        .build_plan(&phases.iter().copied().collect())
        .unwrap();
    ExecutionEngine::new(
        IDENTITY,
        RecordStore::new(fx.layout.record()),
        ExecuteOptions::default(),
    )
    .with_clock(fx.clock.clone())
    .run(&plan, &mut NoProgress, &Cancellation::new())
    .unwrap()
}
