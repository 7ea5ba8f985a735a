//! Backend abstraction for host tooling.
//!
//! Each trait is a narrow contract the provisioning steps rely on. The
//! implementations in the submodules drive the real CLI tools; tests
//! substitute in-memory fakes.

pub mod apt;
pub mod compose;
pub mod fail2ban;
pub mod systemd;
pub mod ufw;

use crate::command::{CommandRunner, SystemRunner};
use crate::error::Result;
use crate::types::{JailPolicy, ProbeResult, RuleSet, ServiceState};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// System package manager.
///
/// Both operations are idempotent and safe to retry.
pub trait PackageManager: Send + Sync {
    /// Refresh package lists.
    fn update_index(&self) -> Result<()>;

    /// Age of the package lists, `None` if they were never fetched.
    fn index_age(&self) -> Result<Option<Duration>>;

    /// Install packages (no-op for ones already installed).
    fn install(&self, packages: &[String]) -> Result<()>;

    /// Check if a package is installed.
    fn is_installed(&self, package: &str) -> Result<bool>;
}

/// Init system units.
pub trait ServiceManager: Send + Sync {
    /// Enable a unit at boot and start it now.
    fn enable_now(&self, unit: &str) -> Result<()>;

    /// Reload a unit's configuration, restarting it if it cannot reload.
    fn reload(&self, unit: &str) -> Result<()>;

    fn is_active(&self, unit: &str) -> Result<bool>;

    fn is_enabled(&self, unit: &str) -> Result<bool>;
}

/// Container runtime with compose support.
pub trait ContainerRuntime: Send + Sync {
    /// Check if the runtime and its compose plugin respond.
    fn is_available(&self) -> bool;

    /// Create or update every service in the rendered topology file.
    fn apply_topology(&self, compose_file: &Path, project: &str) -> Result<()>;

    fn service_status(&self, project: &str, service: &str) -> Result<ServiceState>;

    fn health_probe(&self, project: &str, service: &str) -> Result<ProbeResult>;
}

/// Host firewall.
pub trait Firewall: Send + Sync {
    /// Replace the entire inbound rule set and enable the firewall.
    fn set_rules(&self, rules: &RuleSet) -> Result<()>;

    /// Whether the firewall is active with exactly these rules.
    fn is_enforced(&self, rules: &RuleSet) -> Result<bool>;
}

/// Intrusion prevention (ban-on-repeated-failure).
pub trait IntrusionPrevention: Send + Sync {
    fn configure_jail(&self, service: &str, policy: &JailPolicy) -> Result<()>;

    /// Whether the jail is configured with this policy and running.
    fn jail_active(&self, service: &str, policy: &JailPolicy) -> Result<bool>;
}

/// All adapters a provisioning run needs.
#[derive(Clone)]
pub struct HostAdapters {
    pub packages: Arc<dyn PackageManager>,
    pub services: Arc<dyn ServiceManager>,
    pub containers: Arc<dyn ContainerRuntime>,
    pub firewall: Arc<dyn Firewall>,
    pub jails: Arc<dyn IntrusionPrevention>,
}

impl HostAdapters {
    /// Adapters backed by apt, systemd, docker compose, ufw and fail2ban.
    pub fn system() -> Self {
        Self::with_runner(Arc::new(SystemRunner))
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            packages: Arc::new(apt::Apt::new(runner.clone())),
            services: Arc::new(systemd::Systemd::new(runner.clone())),
            containers: Arc::new(compose::DockerCompose::new(runner.clone())),
            firewall: Arc::new(ufw::Ufw::new(runner.clone())),
            jails: Arc::new(fail2ban::Fail2ban::new(runner)),
        }
    }
}

impl std::fmt::Debug for HostAdapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostAdapters").finish_non_exhaustive()
    }
}
