//! meshlane.toml configuration parser.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;
use crate::types::InstanceSpec;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Self-registration. Absent means this process is not discoverable.
    pub agent: Option<AgentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry agent address (host:port).
    #[serde(default = "default_registry_address")]
    pub address: String,
    /// Per-request timeout.
    #[serde(default = "default_registry_timeout")]
    pub timeout: String,
    /// ACL token, sent as `X-Consul-Token`.
    pub token: Option<String>,
    pub datacenter: Option<String>,
}

/// Named selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    RoundRobin,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Services this process may discover.
    pub services: Vec<String>,
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open a breaker.
    #[serde(default = "default_threshold")]
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    #[serde(default = "default_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_cooldown")]
    pub cooldown: String,
    /// Timeout applied to every guarded remote call.
    #[serde(default = "default_call_timeout")]
    pub call_timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Service name this process registers under.
    pub name: String,
    /// Instance id; must be unique in the registry.
    pub id: String,
    pub address: String,
    pub port: u16,
    #[serde(default = "default_check_ttl")]
    pub check_ttl: String,
}

fn default_registry_address() -> String {
    "127.0.0.1:8500".to_string()
}

fn default_registry_timeout() -> String {
    "5s".to_string()
}

fn default_refresh_interval() -> String {
    "10s".to_string()
}

fn default_threshold() -> u32 {
    5
}

fn default_cooldown() -> String {
    "1m".to_string()
}

fn default_call_timeout() -> String {
    "2s".to_string()
}

fn default_check_ttl() -> String {
    "24h".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: default_registry_address(),
            timeout: default_registry_timeout(),
            token: None,
            datacenter: None,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_threshold(),
            success_threshold: default_threshold(),
            cooldown: default_cooldown(),
            call_timeout: default_call_timeout(),
        }
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(5))
    }
}

impl DiscoveryConfig {
    pub fn refresh_interval(&self) -> Duration {
        parse_duration(&self.refresh_interval).unwrap_or(Duration::from_secs(10))
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        parse_duration(&self.cooldown).unwrap_or(Duration::from_secs(60))
    }

    pub fn call_timeout(&self) -> Duration {
        parse_duration(&self.call_timeout).unwrap_or(Duration::from_secs(2))
    }
}

impl AgentConfig {
    pub fn check_ttl(&self) -> Duration {
        parse_duration(&self.check_ttl).unwrap_or(Duration::from_secs(86_400))
    }

    /// Registration spec for this process.
    pub fn instance_spec(&self) -> InstanceSpec {
        InstanceSpec::with_ttl_check(
            &self.id,
            &self.name,
            &self.address,
            self.port,
            self.check_ttl(),
        )
    }
}

impl MeshConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate a config document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: MeshConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery.services.is_empty() {
            return invalid("discovery.services must list at least one service");
        }
        let mut seen = HashSet::new();
        for name in &self.discovery.services {
            if name.trim().is_empty() {
                return invalid("discovery.services contains an empty name");
            }
            if !seen.insert(name.as_str()) {
                return invalid(&format!("duplicate service name: {name}"));
            }
        }

        require_duration("registry.timeout", &self.registry.timeout)?;
        require_duration("discovery.refresh_interval", &self.discovery.refresh_interval)?;
        require_duration("breaker.cooldown", &self.breaker.cooldown)?;
        require_duration("breaker.call_timeout", &self.breaker.call_timeout)?;

        if self.breaker.failure_threshold == 0 {
            return invalid("breaker.failure_threshold must be at least 1");
        }
        if self.breaker.success_threshold == 0 {
            return invalid("breaker.success_threshold must be at least 1");
        }

        if let Some(agent) = &self.agent {
            if agent.name.trim().is_empty() || agent.id.trim().is_empty() {
                return invalid("agent.name and agent.id must be set");
            }
            require_duration("agent.check_ttl", &agent.check_ttl)?;
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid(msg.to_string()))
}

/// A duration field must parse and be non-zero.
fn require_duration(field: &str, value: &str) -> Result<(), ConfigError> {
    match parse_duration(value) {
        Some(d) if !d.is_zero() => Ok(()),
        _ => invalid(&format!("{field} is not a valid non-zero duration: {value:?}")),
    }
}
