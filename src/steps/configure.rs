//! Configure phase: host hardening, secrets and rendered artifacts.

use converge::{ApplyContext, Phase, Step, StepError, StepRegistry};
use renderkit::FileMode;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use zeroize::Zeroizing;

use super::{HostContext, TEMPLATE_COMPOSE, TEMPLATE_ENV, TEMPLATE_PROXY, TEMPLATE_SSHD};
use crate::topology::{self, EnvLine, ProxyBindings};

const SSH_UNIT: &str = "ssh";
const JAIL_UNIT: &str = "fail2ban";
const JAIL_SERVICE: &str = "sshd";

pub(super) fn register(registry: &mut StepRegistry, ctx: &Arc<HostContext>) {
    registry
        .register(SshHarden { ctx: ctx.clone() })
        .register(FirewallRules { ctx: ctx.clone() })
        .register(SshJail { ctx: ctx.clone() })
        .register(GenerateSecrets { ctx: ctx.clone() })
        .register(RenderEnv { ctx: ctx.clone() })
        .register(RenderArtifact {
            ctx: ctx.clone(),
            kind: Artifact::Topology,
        })
        .register(RenderArtifact {
            ctx: ctx.clone(),
            kind: Artifact::Proxy,
        });
}

// ============================================================================
// Host hardening
// ============================================================================

#[derive(Debug, Serialize)]
struct SshBindings<'a> {
    port: u16,
    permit_root_login: bool,
    password_authentication: bool,
    allow_users: &'a [String],
    max_auth_tries: u32,
}

#[derive(Debug)]
struct SshHarden {
    ctx: Arc<HostContext>,
}

impl SshHarden {
    fn render(&self) -> Result<Vec<u8>, StepError> {
        let ssh = &self.ctx.config.ssh;
        let bindings = SshBindings {
            port: ssh.port,
            permit_root_login: ssh.permit_root_login,
            password_authentication: ssh.password_authentication,
            allow_users: &ssh.allow_users,
            max_auth_tries: ssh.max_auth_tries,
        };
        Ok(self.ctx.renderer.render(TEMPLATE_SSHD, &bindings)?)
    }
}

impl Step for SshHarden {
    fn id(&self) -> &str {
        "ssh.harden"
    }

    fn description(&self) -> String {
        format!("Harden sshd (port {})", self.ctx.config.ssh.port)
    }

    fn phase(&self) -> Phase {
        Phase::Configure
    }

    fn depends_on(&self) -> Vec<String> {
        vec!["packages.base".to_string()]
    }

    fn is_applied(&self) -> Result<bool, StepError> {
        let rendered = self.render()?;
        Ok(self
            .ctx
            .renderer
            .is_current(&self.ctx.sshd_dropin, &rendered, FileMode::Public))
    }

    fn apply(&self, _ctx: &ApplyContext) -> Result<(), StepError> {
        let rendered = self.render()?;
        self.ctx
            .renderer
            .write(&self.ctx.sshd_dropin, &rendered, FileMode::Public)?;
        // A retry after a failed reload finds the drop-in already current
        self.ctx.host.services.reload(SSH_UNIT)?;
        Ok(())
    }
}

/// Inbound firewall: deny by default, allow SSH plus configured ports
#[derive(Debug)]
struct FirewallRules {
    ctx: Arc<HostContext>,
}

impl Step for FirewallRules {
    fn id(&self) -> &str {
        "firewall.rules"
    }

    fn description(&self) -> String {
        format!("Allow inbound {}", self.ctx.config.rule_set().specs().join(" "))
    }

    fn phase(&self) -> Phase {
        Phase::Configure
    }

    // The firewall must not come up before sshd listens on the allowed port
    fn depends_on(&self) -> Vec<String> {
        vec!["ssh.harden".to_string()]
    }

    fn is_applied(&self) -> Result<bool, StepError> {
        Ok(self.ctx.host.firewall.is_enforced(&self.ctx.config.rule_set())?)
    }

    fn apply(&self, _ctx: &ApplyContext) -> Result<(), StepError> {
        self.ctx.host.firewall.set_rules(&self.ctx.config.rule_set())?;
        Ok(())
    }
}

#[derive(Debug)]
struct SshJail {
    ctx: Arc<HostContext>,
}

impl Step for SshJail {
    fn id(&self) -> &str {
        "jail.sshd"
    }

    fn description(&self) -> String {
        let jail = &self.ctx.config.jail;
        format!(
            "Ban after {} failed SSH logins for {}s",
            jail.max_retry, jail.ban_time_secs
        )
    }

    fn phase(&self) -> Phase {
        Phase::Configure
    }

    fn depends_on(&self) -> Vec<String> {
        vec!["ssh.harden".to_string()]
    }

    fn is_applied(&self) -> Result<bool, StepError> {
        let host = &self.ctx.host;
        Ok(host.services.is_active(JAIL_UNIT)?
            && host
                .jails
                .jail_active(JAIL_SERVICE, &self.ctx.config.jail_policy())?)
    }

    fn apply(&self, _ctx: &ApplyContext) -> Result<(), StepError> {
        let host = &self.ctx.host;
        host.services.enable_now(JAIL_UNIT)?;
        host.jails
            .configure_jail(JAIL_SERVICE, &self.ctx.config.jail_policy())?;
        Ok(())
    }
}

// ============================================================================
// Secrets
// ============================================================================

#[derive(Debug)]
struct GenerateSecrets {
    ctx: Arc<HostContext>,
}

impl Step for GenerateSecrets {
    fn id(&self) -> &str {
        "secrets.generate"
    }

    fn description(&self) -> String {
        format!(
            "Generate {} deployment secrets",
            self.ctx.topology.secret_keys().len()
        )
    }

    fn phase(&self) -> Phase {
        Phase::Configure
    }

    fn is_applied(&self) -> Result<bool, StepError> {
        Ok(self
            .ctx
            .topology
            .secret_keys()
            .iter()
            .all(|key| self.ctx.secrets.contains(key)))
    }

    fn apply(&self, _ctx: &ApplyContext) -> Result<(), StepError> {
        for key in self.ctx.topology.secret_keys() {
            let spec = topology::secret_spec(key).ok_or_else(|| {
                StepError::fatal(format!("no generation rule for secret '{key}'"))
            })?;
            self.ctx.secrets.get_or_generate(key, spec)?;
        }
        Ok(())
    }
}

// ============================================================================
// Rendered artifacts
// ============================================================================

#[derive(Serialize)]
struct EnvBindings<'a> {
    lines: Vec<EnvLine<'a>>,
}

/// One env file per service, mode 0600
#[derive(Debug)]
struct RenderEnv {
    ctx: Arc<HostContext>,
}

impl RenderEnv {
    /// Rendered env files, `None` while a referenced secret is missing
    fn render_all(&self) -> Result<Option<Vec<(PathBuf, Zeroizing<Vec<u8>>)>>, StepError> {
        let exported = self.ctx.secrets.export_env();
        let mut files = Vec::new();
        for service in self.ctx.topology.env_services() {
            let Some(path) = self.ctx.artifacts.env_file(service) else {
                continue;
            };
            let lines = match topology::env_lines(service, &exported) {
                Ok(lines) => lines,
                Err(e) => {
                    log::debug!("Env for {} not ready: {}", service.name, e);
                    return Ok(None);
                }
            };
            let rendered = self
                .ctx
                .renderer
                .render(TEMPLATE_ENV, &EnvBindings { lines })?;
            files.push((path, Zeroizing::new(rendered)));
        }
        Ok(Some(files))
    }
}

impl Step for RenderEnv {
    fn id(&self) -> &str {
        "render.env"
    }

    fn description(&self) -> String {
        format!(
            "Write service env files to {}",
            self.ctx.artifacts.root.join("env").display()
        )
    }

    fn phase(&self) -> Phase {
        Phase::Configure
    }

    fn depends_on(&self) -> Vec<String> {
        vec!["secrets.generate".to_string()]
    }

    fn is_applied(&self) -> Result<bool, StepError> {
        Ok(match self.render_all()? {
            Some(files) => files.iter().all(|(path, bytes)| {
                self.ctx.renderer.is_current(path, bytes, FileMode::Secret)
            }),
            None => false,
        })
    }

    fn apply(&self, _ctx: &ApplyContext) -> Result<(), StepError> {
        let files = self
            .render_all()?
            .ok_or_else(|| StepError::fatal("env files reference secrets that were never generated"))?;
        for (path, bytes) in &files {
            self.ctx.renderer.write(path, bytes, FileMode::Secret)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Artifact {
    Topology,
    Proxy,
}

/// A world-readable artifact that embeds no secret material
#[derive(Debug)]
struct RenderArtifact {
    ctx: Arc<HostContext>,
    kind: Artifact,
}

impl RenderArtifact {
    fn path(&self) -> PathBuf {
        match self.kind {
            Artifact::Topology => self.ctx.artifacts.compose(),
            Artifact::Proxy => self.ctx.artifacts.proxy(),
        }
    }

    fn render(&self) -> Result<Vec<u8>, StepError> {
        let renderer = &self.ctx.renderer;
        let bytes = match self.kind {
            Artifact::Topology => {
                renderer.render(TEMPLATE_COMPOSE, &self.ctx.topology.compose_bindings())?
            }
            Artifact::Proxy => renderer.render(TEMPLATE_PROXY, &ProxyBindings::new(&self.ctx.config))?,
        };
        Ok(bytes)
    }
}

impl Step for RenderArtifact {
    fn id(&self) -> &str {
        match self.kind {
            Artifact::Topology => "render.topology",
            Artifact::Proxy => "render.proxy",
        }
    }

    fn description(&self) -> String {
        format!("Write {}", self.path().display())
    }

    fn phase(&self) -> Phase {
        Phase::Configure
    }

    fn is_applied(&self) -> Result<bool, StepError> {
        let rendered = self.render()?;
        Ok(self
            .ctx
            .renderer
            .is_current(&self.path(), &rendered, FileMode::Public))
    }

    fn apply(&self, _ctx: &ApplyContext) -> Result<(), StepError> {
        let rendered = self.render()?;
        let path = self.path();
        self.ctx.renderer.write(&path, &rendered, FileMode::Public)?;
        Ok(())
    }
}
