//! Service topology: the containers the deploy phase runs.
//!
//! Secrets never appear in the topology file itself. Each service that needs
//! secret material gets its own env file (mode 0600) and the topology file
//! only points at it through `env_file`.

use secretkit::SecretSpec;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::Config;

/// Secrets the stack needs, with the shape each one is generated in
pub const SECRETS: &[(&str, SecretSpec)] = &[
    ("db_root", SecretSpec::password(32)),
    ("db_password", SecretSpec::password(32)),
    ("cache_auth", SecretSpec::password(32)),
    ("jwt_secret", SecretSpec::hex(64)),
    ("collab_jwt", SecretSpec::hex(64)),
    ("admin_password", SecretSpec::password(20)),
];

/// Generation rule for a secret key
pub fn secret_spec(key: &str) -> Option<&'static SecretSpec> {
    SECRETS.iter().find(|(k, _)| *k == key).map(|(_, spec)| spec)
}

/// Value of an environment variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    Literal(String),
    /// Looked up in the secret store at render time
    Secret(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub test: Vec<String>,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub retries: u32,
    pub start_period_secs: u64,
}

impl HealthCheck {
    fn shell(command: &str, start_period_secs: u64) -> Self {
        Self {
            test: vec!["CMD-SHELL".to_string(), command.to_string()],
            interval_secs: 10,
            timeout_secs: 5,
            retries: 5,
            start_period_secs,
        }
    }
}

/// One container in the topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDef {
    pub name: &'static str,
    pub image: String,
    pub command: Vec<String>,
    pub environment: Vec<(String, EnvValue)>,
    pub volumes: Vec<String>,
    pub ports: Vec<String>,
    pub networks: Vec<&'static str>,
    pub depends_on: Vec<&'static str>,
    pub healthcheck: Option<HealthCheck>,
}

impl ServiceDef {
    fn new(name: &'static str, image: &str) -> Self {
        Self {
            name,
            image: image.to_string(),
            command: Vec::new(),
            environment: Vec::new(),
            volumes: Vec::new(),
            ports: Vec::new(),
            networks: Vec::new(),
            depends_on: Vec::new(),
            healthcheck: None,
        }
    }

    fn env(mut self, key: &str, value: EnvValue) -> Self {
        self.environment.push((key.to_string(), value));
        self
    }

    fn literal(self, key: &str, value: &str) -> Self {
        self.env(key, EnvValue::Literal(value.to_string()))
    }

    fn secret(self, key: &str, secret: &'static str) -> Self {
        self.env(key, EnvValue::Secret(secret))
    }

    /// Env file name relative to the output directory
    pub fn env_file(&self) -> Option<String> {
        (!self.environment.is_empty()).then(|| format!("env/{}.env", self.name))
    }

    /// Secret keys this service references
    pub fn secret_keys(&self) -> Vec<&'static str> {
        self.environment
            .iter()
            .filter_map(|(_, v)| match v {
                EnvValue::Secret(key) => Some(*key),
                EnvValue::Literal(_) => None,
            })
            .collect()
    }
}

/// The desired set of services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTopology {
    /// Compose project name (the deployment identity)
    pub project: String,
    pub services: Vec<ServiceDef>,
    pub volumes: Vec<&'static str>,
    pub networks: Vec<&'static str>,
}

impl ServiceTopology {
    /// The content-management stack: database, cache, application,
    /// document collaboration server and reverse proxy.
    pub fn standard(config: &Config) -> Self {
        let images = &config.images;
        let deployment = &config.deployment;

        let db = ServiceDef {
            volumes: vec!["db-data:/var/lib/mysql".into()],
            networks: vec!["backend"],
            healthcheck: Some(HealthCheck::shell(
                "healthcheck.sh --connect --innodb_initialized",
                30,
            )),
            ..ServiceDef::new("db", &images.db)
        }
        .secret("MARIADB_ROOT_PASSWORD", "db_root")
        .literal("MARIADB_AUTO_UPGRADE", "1")
        .literal("MARIADB_INITDB_SKIP_TZINFO", "1");

        let cache = ServiceDef {
            command: vec![
                "sh".into(),
                "-c".into(),
                "exec redis-server --requirepass \"$$REDIS_PASSWORD\"".into(),
            ],
            volumes: vec!["cache-data:/data".into()],
            networks: vec!["backend"],
            healthcheck: Some(HealthCheck::shell(
                "redis-cli -a \"$$REDIS_PASSWORD\" --no-auth-warning ping | grep -q PONG",
                10,
            )),
            ..ServiceDef::new("cache", &images.cache)
        }
        .secret("REDIS_PASSWORD", "cache_auth");

        let app = ServiceDef {
            volumes: vec!["app-data:/shared".into()],
            networks: vec!["backend", "frontend"],
            depends_on: vec!["db", "cache"],
            healthcheck: Some(HealthCheck::shell(
                "curl -fsS http://localhost/api2/ping/ || exit 1",
                120,
            )),
            ..ServiceDef::new("app", &images.app)
        }
        .literal("DB_HOST", "db")
        .literal("DB_PORT", "3306")
        .literal("DB_USER", "app")
        .secret("INIT_SEAFILE_MYSQL_ROOT_PASSWORD", "db_root")
        .secret("DB_PASSWORD", "db_password")
        .literal("CACHE_PROVIDER", "redis")
        .literal("REDIS_HOST", "cache")
        .literal("REDIS_PORT", "6379")
        .secret("REDIS_PASSWORD", "cache_auth")
        .secret("JWT_PRIVATE_KEY", "jwt_secret")
        .literal("SEAFILE_SERVER_HOSTNAME", &deployment.domain)
        .literal("SEAFILE_SERVER_PROTOCOL", "http")
        .literal("INIT_SEAFILE_ADMIN_EMAIL", &deployment.admin_email)
        .secret("INIT_SEAFILE_ADMIN_PASSWORD", "admin_password")
        .literal("ENABLE_ONLYOFFICE", "true")
        .secret("ONLYOFFICE_JWT_SECRET", "collab_jwt")
        .literal("TIME_ZONE", "Etc/UTC");

        let collab = ServiceDef {
            volumes: vec!["collab-data:/var/www/onlyoffice/Data".into()],
            networks: vec!["frontend"],
            healthcheck: Some(HealthCheck::shell(
                "curl -fsS http://localhost/healthcheck || exit 1",
                60,
            )),
            ..ServiceDef::new("collab", &images.collab)
        }
        .literal("JWT_ENABLED", "true")
        .literal("JWT_HEADER", "AuthorizationJwt")
        .secret("JWT_SECRET", "collab_jwt");

        let proxy = ServiceDef {
            volumes: vec!["./nginx.conf:/etc/nginx/conf.d/default.conf:ro".into()],
            ports: vec!["80:80".into()],
            networks: vec!["frontend"],
            depends_on: vec!["app", "collab"],
            healthcheck: Some(HealthCheck::shell("nginx -t -q || exit 1", 5)),
            ..ServiceDef::new("proxy", &images.proxy)
        };

        Self {
            project: deployment.identity.clone(),
            services: vec![db, cache, app, collab, proxy],
            volumes: vec!["db-data", "cache-data", "app-data", "collab-data"],
            networks: vec!["backend", "frontend"],
        }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDef> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.to_string()).collect()
    }

    /// Services that need an env file
    pub fn env_services(&self) -> impl Iterator<Item = &ServiceDef> {
        self.services.iter().filter(|s| !s.environment.is_empty())
    }

    /// Every secret key some service references, sorted
    pub fn secret_keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<&'static str> = self
            .services
            .iter()
            .flat_map(ServiceDef::secret_keys)
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    /// Bindings for the topology template. Contains no secret values.
    pub fn compose_bindings(&self) -> ComposeBindings {
        ComposeBindings {
            project: self.project.clone(),
            services: self.services.iter().map(ComposeService::from_def).collect(),
            volumes: self.volumes.iter().map(ToString::to_string).collect(),
            networks: self.networks.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Artifact locations under the output directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub root: PathBuf,
}

impl ArtifactPaths {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn compose(&self) -> PathBuf {
        self.root.join("compose.yml")
    }

    pub fn proxy(&self) -> PathBuf {
        self.root.join("nginx.conf")
    }

    pub fn env_file(&self, service: &ServiceDef) -> Option<PathBuf> {
        service.env_file().map(|f| self.root.join(f))
    }
}

// ============================================================================
// Template bindings
// ============================================================================

/// Quote a string as a YAML flow scalar (JSON strings are valid YAML)
fn yaml_str(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn yaml_list(values: &[String]) -> String {
    format!(
        "[{}]",
        values.iter().map(|v| yaml_str(v)).collect::<Vec<_>>().join(", ")
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeBindings {
    pub project: String,
    pub services: Vec<ComposeService>,
    pub volumes: Vec<String>,
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeService {
    pub name: String,
    pub image: String,
    /// Pre-quoted YAML flow list, `None` when the image default is used
    pub command: Option<String>,
    pub env_file: Option<String>,
    pub volumes: Vec<String>,
    pub ports: Vec<String>,
    pub networks: Vec<String>,
    pub depends_on: Vec<ComposeDependency>,
    pub healthcheck: Option<ComposeHealthCheck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeDependency {
    pub name: String,
    /// Compose start condition
    pub condition: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeHealthCheck {
    pub test: String,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
    pub start_period: String,
}

impl ComposeService {
    fn from_def(def: &ServiceDef) -> Self {
        Self {
            name: def.name.to_string(),
            image: yaml_str(&def.image),
            command: (!def.command.is_empty()).then(|| yaml_list(&def.command)),
            env_file: def.env_file(),
            volumes: def.volumes.iter().map(|v| yaml_str(v)).collect(),
            ports: def.ports.iter().map(|p| yaml_str(p)).collect(),
            networks: def.networks.iter().map(ToString::to_string).collect(),
            depends_on: def
                .depends_on
                .iter()
                .map(|name| ComposeDependency {
                    name: (*name).to_string(),
                    condition: "service_healthy",
                })
                .collect(),
            healthcheck: def.healthcheck.as_ref().map(|h| ComposeHealthCheck {
                test: yaml_list(&h.test),
                interval: format!("{}s", h.interval_secs),
                timeout: format!("{}s", h.timeout_secs),
                retries: h.retries,
                start_period: format!("{}s", h.start_period_secs),
            }),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// An env file references a secret that has not been generated
    #[error("secret '{key}' has not been generated")]
    MissingSecret { key: &'static str },
}

/// One line of an env file
#[derive(Debug, Serialize)]
pub struct EnvLine<'a> {
    pub key: &'a str,
    pub value: &'a str,
}

/// Resolve a service's environment against exported secret values.
///
/// Fails on the first referenced secret that is missing.
pub fn env_lines<'a>(
    service: &'a ServiceDef,
    secrets: &'a BTreeMap<String, secretkit::SecretMaterial>,
) -> Result<Vec<EnvLine<'a>>, TopologyError> {
    service
        .environment
        .iter()
        .map(|(key, value)| {
            let value = match value {
                EnvValue::Literal(v) => v.as_str(),
                EnvValue::Secret(name) => secrets
                    .get(*name)
                    .ok_or(TopologyError::MissingSecret { key: *name })?
                    .expose(),
            };
            Ok(EnvLine { key, value })
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct ProxyBindings {
    pub domain: String,
    pub app_upstream: String,
    pub collab_upstream: String,
}

impl ProxyBindings {
    pub fn new(config: &Config) -> Self {
        Self {
            domain: config.deployment.domain.clone(),
            app_upstream: "app:80".to_string(),
            collab_upstream: "collab:80".to_string(),
        }
    }
}
