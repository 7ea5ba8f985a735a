//! Concrete provisioning steps for the application host.
//!
//! | Phase | Steps |
//! |-------|-------|
//! | install | `packages.index`, `packages.base`, `packages.container-runtime`, `service.container-runtime` |
//! | configure | `ssh.harden`, `firewall.rules`, `jail.sshd`, `secrets.generate`, `render.env`, `render.topology`, `render.proxy` |
//! | deploy | `containers.up` |

mod configure;
mod deploy;
mod install;

use converge::StepRegistry;
use hostkit::HostAdapters;
use renderkit::ConfigRenderer;
use secretkit::SecretStore;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::topology::{ArtifactPaths, ServiceTopology};

pub use deploy::is_deployed_current;

pub const TEMPLATE_COMPOSE: &str = "compose.yml";
pub const TEMPLATE_PROXY: &str = "nginx.conf";
pub const TEMPLATE_ENV: &str = "app.env";
pub const TEMPLATE_SSHD: &str = "sshd.conf";

/// Default location of the SSH hardening drop-in
pub const SSHD_DROPIN: &str = "/etc/ssh/sshd_config.d/60-provision.conf";

/// Renderer with every template the steps use
pub fn renderer() -> renderkit::Result<ConfigRenderer> {
    let mut renderer = ConfigRenderer::new();
    renderer.add_template(TEMPLATE_COMPOSE, include_str!("../../templates/compose.yml"))?;
    renderer.add_template(TEMPLATE_PROXY, include_str!("../../templates/nginx.conf"))?;
    renderer.add_template(TEMPLATE_ENV, include_str!("../../templates/app.env"))?;
    renderer.add_template(TEMPLATE_SSHD, include_str!("../../templates/sshd.conf"))?;
    Ok(renderer)
}

/// Everything the steps of one run share
pub struct HostContext {
    pub host: HostAdapters,
    pub config: Config,
    pub topology: ServiceTopology,
    pub artifacts: ArtifactPaths,
    pub sshd_dropin: PathBuf,
    pub renderer: ConfigRenderer,
    pub secrets: Arc<SecretStore>,
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("identity", &self.config.deployment.identity)
            .field("artifacts", &self.artifacts.root)
            .finish_non_exhaustive()
    }
}

/// Register every step in declaration order
pub fn register_all(registry: &mut StepRegistry, ctx: &Arc<HostContext>) {
    install::register(registry, ctx);
    configure::register(registry, ctx);
    deploy::register(registry, ctx);
}
