//! # hostkit
//!
//! Narrow adapters over the host tools a provisioning run drives:
//!
//! - [`PackageManager`] via `apt-get`
//! - [`ServiceManager`] via `systemctl`
//! - [`ContainerRuntime`] via `docker compose`
//! - [`Firewall`] via `ufw`
//! - [`IntrusionPrevention`] via fail2ban
//!
//! Tool failures are classified from stderr into an [`ErrorCategory`] that
//! maps onto the engine's transient/persistent/fatal split.
//!
//! ```no_run
//! use hostkit::HostAdapters;
//!
//! let host = HostAdapters::system();
//! if !host.packages.is_installed("docker.io")? {
//!     host.packages.install(&["docker.io".to_string()])?;
//! }
//! # Ok::<(), hostkit::Error>(())
//! ```

pub mod backend;
pub mod command;
pub mod error;
pub mod types;

pub use backend::{
    ContainerRuntime, Firewall, HostAdapters, IntrusionPrevention, PackageManager, ServiceManager,
};
pub use command::{CommandOutput, CommandRunner, SystemRunner};
pub use error::{Error, ErrorCategory, Result};
pub use types::{FirewallRule, JailPolicy, ProbeResult, Protocol, RuleSet, ServiceState};
