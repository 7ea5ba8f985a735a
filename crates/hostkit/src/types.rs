//! Data passed to and returned from host adapters

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Firewall
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound allow rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub port: u16,
    #[serde(default)]
    pub proto: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl FirewallRule {
    pub fn tcp(port: u16, comment: &str) -> Self {
        Self {
            port,
            proto: Protocol::Tcp,
            comment: Some(comment.to_string()),
        }
    }

    /// `22/tcp` form used by ufw
    pub fn spec(&self) -> String {
        format!("{}/{}", self.port, self.proto)
    }
}

/// Complete inbound policy: deny everything except `allow`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleSet {
    pub allow: Vec<FirewallRule>,
}

impl RuleSet {
    /// Build a rule set, dropping duplicate port/proto pairs (first wins)
    pub fn new(rules: impl IntoIterator<Item = FirewallRule>) -> Self {
        let mut allow: Vec<FirewallRule> = Vec::new();
        for rule in rules {
            if !allow.iter().any(|r| r.port == rule.port && r.proto == rule.proto) {
                allow.push(rule);
            }
        }
        Self { allow }
    }

    /// Sorted `port/proto` pairs, for comparison with live state
    pub fn specs(&self) -> Vec<String> {
        let mut specs: Vec<String> = self.allow.iter().map(FirewallRule::spec).collect();
        specs.sort();
        specs
    }
}

// ============================================================================
// Intrusion prevention
// ============================================================================

/// Ban policy for one jail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JailPolicy {
    /// Port(s) the jail protects, as fail2ban expects them
    pub port: String,
    pub max_retry: u32,
    pub ban_time_secs: u64,
    pub find_time_secs: u64,
}

// ============================================================================
// Containers
// ============================================================================

/// Lifecycle state of a topology service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Running,
    Exited,
    Missing,
}

/// Result of a single health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeResult {
    Healthy,
    Unhealthy,
    /// Container is up but its health check has not passed yet
    Starting,
    Unknown,
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Starting => "starting",
            Self::Unknown => "unknown",
        })
    }
}
