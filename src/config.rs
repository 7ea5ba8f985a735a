//! The `provision.toml` configuration model.
//!
//! Every section and field is optional; a missing file yields the defaults.

use anyhow::{Context, Result, bail};
use converge::RetryConfig;
use hostkit::{FirewallRule, JailPolicy, RuleSet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

/// Check a deployment identity: it names a state directory and a compose project
pub fn validate_identity(identity: &str) -> Result<()> {
    let pattern = Regex::new(r"^[A-Za-z0-9._-]+$").context("identity pattern")?;
    if !pattern.is_match(identity) || identity == "." || identity == ".." {
        bail!("Invalid deployment identity '{identity}': use letters, digits, '.', '_' or '-'");
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub deployment: DeploymentConfig,
    pub packages: PackagesConfig,
    pub ssh: SshConfig,
    pub firewall: FirewallConfig,
    pub jail: JailConfig,
    pub retry: RetrySettings,
    pub health: HealthConfig,
    pub images: ImagesConfig,
}

impl Config {
    /// Load from `path`, or the default location when `None`.
    ///
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<(Self, PathBuf)> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => paths::default_config_file()?,
        };

        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok((Self::default(), path));
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok((config, path))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_identity(&self.deployment.identity)?;
        self.packages.validate().context("Invalid [packages]")?;
        self.ssh.validate().context("Invalid [ssh]")?;
        self.firewall.validate().context("Invalid [firewall]")?;
        self.retry.validate().context("Invalid [retry]")?;
        self.health.validate().context("Invalid [health]")?;
        self.images.validate().context("Invalid [images]")?;
        Ok(())
    }

    /// Directory rendered artifacts are written to
    pub fn output_dir(&self) -> PathBuf {
        match &self.deployment.output_dir {
            Some(dir) => paths::expand(dir),
            None => PathBuf::from("/opt").join(&self.deployment.identity),
        }
    }

    /// Inbound rules: configured ports plus the SSH port
    pub fn rule_set(&self) -> RuleSet {
        let ssh = FirewallRule::tcp(self.ssh.port, "ssh");
        RuleSet::new(std::iter::once(ssh).chain(self.firewall.allow.iter().cloned()))
    }

    pub fn jail_policy(&self) -> JailPolicy {
        JailPolicy {
            port: self.ssh.port.to_string(),
            max_retry: self.jail.max_retry,
            ban_time_secs: self.jail.ban_time_secs,
            find_time_secs: self.jail.find_time_secs,
        }
    }
}

// ============================================================================
// Deployment
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Stable key scoping records and secrets (usually the host name)
    pub identity: String,
    /// Public host name served by the proxy
    pub domain: String,
    pub admin_email: String,
    /// Where rendered artifacts go; defaults to `/opt/<identity>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            identity: "default".to_string(),
            domain: "localhost".to_string(),
            admin_email: "admin@localhost".to_string(),
            output_dir: None,
        }
    }
}

// ============================================================================
// Packages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagesConfig {
    pub base: Vec<String>,
    pub container_runtime: Vec<String>,
    /// Package lists older than this are refreshed
    pub max_index_age_hours: u64,
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            base: ["ca-certificates", "curl", "gnupg", "openssh-server", "ufw", "fail2ban"]
                .map(String::from)
                .to_vec(),
            container_runtime: ["docker.io", "docker-compose-v2"].map(String::from).to_vec(),
            max_index_age_hours: 24,
        }
    }
}

impl PackagesConfig {
    fn validate(&self) -> Result<()> {
        if self.container_runtime.is_empty() {
            bail!("container_runtime must name at least one package");
        }
        if let Some(bad) = self
            .base
            .iter()
            .chain(&self.container_runtime)
            .find(|p| p.trim().is_empty() || p.starts_with('-'))
        {
            bail!("invalid package name '{bad}'");
        }
        Ok(())
    }

    pub fn max_index_age(&self) -> Duration {
        Duration::from_secs(self.max_index_age_hours * 3600)
    }
}

// ============================================================================
// SSH
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub port: u16,
    pub permit_root_login: bool,
    pub password_authentication: bool,
    pub allow_users: Vec<String>,
    pub max_auth_tries: u32,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            port: 22,
            permit_root_login: false,
            password_authentication: false,
            allow_users: Vec::new(),
            max_auth_tries: 3,
        }
    }
}

impl SshConfig {
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("port must be non-zero");
        }
        if self.max_auth_tries == 0 {
            bail!("max_auth_tries must be at least 1");
        }
        if let Some(user) = self.allow_users.iter().find(|u| u.is_empty() || u.contains(char::is_whitespace)) {
            bail!("invalid user name '{user}' in allow_users");
        }
        Ok(())
    }
}

// ============================================================================
// Firewall / intrusion prevention
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    /// Inbound allow rules in addition to SSH
    pub allow: Vec<FirewallRule>,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            allow: vec![FirewallRule::tcp(80, "http"), FirewallRule::tcp(443, "https")],
        }
    }
}

impl FirewallConfig {
    fn validate(&self) -> Result<()> {
        if self.allow.iter().any(|r| r.port == 0) {
            bail!("allow rules need a non-zero port");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JailConfig {
    pub max_retry: u32,
    pub ban_time_secs: u64,
    pub find_time_secs: u64,
}

impl Default for JailConfig {
    fn default() -> Self {
        Self {
            max_retry: 5,
            ban_time_secs: 3600,
            find_time_secs: 600,
        }
    }
}

// ============================================================================
// Retry / health
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            backoff_factor: defaults.backoff_factor,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
        }
    }
}

impl RetrySettings {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            bail!("backoff_factor must be >= 1.0");
        }
        Ok(())
    }

    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            poll_interval_secs: 5,
        }
    }
}

impl HealthConfig {
    fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be at least 1");
        }
        if self.poll_interval_secs > self.timeout_secs {
            bail!("poll_interval_secs exceeds timeout_secs");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

// ============================================================================
// Images
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub db: String,
    pub cache: String,
    pub app: String,
    pub collab: String,
    pub proxy: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            db: "mariadb:10.11".to_string(),
            cache: "redis:7-alpine".to_string(),
            app: "seafileltd/seafile-mc:12.0-latest".to_string(),
            collab: "onlyoffice/documentserver:8.2".to_string(),
            proxy: "nginx:1.27-alpine".to_string(),
        }
    }
}

impl ImagesConfig {
    fn validate(&self) -> Result<()> {
        for (service, image) in [
            ("db", &self.db),
            ("cache", &self.cache),
            ("app", &self.app),
            ("collab", &self.collab),
            ("proxy", &self.proxy),
        ] {
            if image.trim().is_empty() || image.contains(char::is_whitespace) {
                bail!("invalid image reference for {service}: '{image}'");
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use hostkit::Protocol;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("provision.toml");
        let (config, resolved) = Config::load(Some(&path)).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(resolved, path);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_merges_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("provision.toml");
        std::fs::write(
            &path,
            r#"
[deployment]
identity = "web-1"
domain = "files.example.org"

[ssh]
port = 2222

[[firewall.allow]]
port = 8443
comment = "alt https"

[retry]
max_attempts = 2
unknown_field = "ignored"
"#,
        )
        .unwrap();

        let (config, _) = Config::load(Some(&path)).unwrap();
        config.validate().unwrap();
        assert_eq!(config.deployment.identity, "web-1");
        assert_eq!(config.deployment.admin_email, "admin@localhost");
        assert_eq!(config.ssh.port, 2222);
        assert_eq!(config.firewall.allow[0].proto, Protocol::Tcp);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 5000);
        assert_eq!(config.output_dir(), PathBuf::from("/opt/web-1"));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("provision.toml");
        std::fs::write(&path, "[ssh\nport = 22").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_identity_validation() {
        assert!(validate_identity("web-1.example_org").is_ok());
        assert!(validate_identity("").is_err());
        assert!(validate_identity("..").is_err());
        assert!(validate_identity("a/b").is_err());
        assert!(validate_identity("has space").is_err());
    }

    #[test]
    fn test_rule_set_always_allows_ssh() {
        let mut config = Config::default();
        config.ssh.port = 2222;
        config.firewall.allow = vec![FirewallRule::tcp(2222, "dup"), FirewallRule::tcp(443, "https")];
        let rules = config.rule_set();
        assert_eq!(rules.specs(), vec!["2222/tcp", "443/tcp"]);
        assert_eq!(rules.allow[0].comment.as_deref(), Some("ssh"));
        assert_eq!(config.jail_policy().port, "2222");
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.health.poll_interval_secs = 600;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.images.app = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.packages.base.push("--purge".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_conversion() {
        let retry = RetrySettings {
            max_attempts: 3,
            base_delay_ms: 250,
            backoff_factor: 3.0,
            max_delay_ms: 1000,
        }
        .to_retry_config();
        assert_eq!(retry.base_delay, Duration::from_millis(250));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(1000));
    }
}
