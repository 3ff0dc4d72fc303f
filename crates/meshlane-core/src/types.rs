//! Domain types shared across meshlane crates.
//!
//! `Endpoint` is what callers receive from the picker. `CheckRecord` and
//! `InstanceRecord` are the two registry views an endpoint is built from.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Logical backend service name, as listed in configuration.
pub type ServiceName = String;

/// Metadata key carrying the id of an endpoint's TTL health check.
pub const CHECK_ID_KEY: &str = "CheckID";

/// Metadata key carrying the logical service an endpoint belongs to.
pub const SERVICE_KEY: &str = "Service";

// ── Endpoint ──────────────────────────────────────────────────────

/// One running instance of a service, as handed out to callers.
///
/// Endpoints are plain values. A refresh replaces the whole list for a
/// service; an individual endpoint is never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique instance id within the registry.
    pub id: String,
    /// `host:port` the instance listens on.
    pub address: String,
    /// Instance metadata; always contains [`CHECK_ID_KEY`] when built
    /// from the registry.
    pub metadata: BTreeMap<String, String>,
}

impl Endpoint {
    /// Build an endpoint from the health check that reported it passing
    /// and the instance record that check belongs to.
    pub fn from_records(service: &str, check: &CheckRecord, instance: &InstanceRecord) -> Self {
        let mut metadata = instance.meta.clone();
        metadata.insert(CHECK_ID_KEY.to_string(), check.check_id.clone());
        metadata.insert(SERVICE_KEY.to_string(), service.to_string());
        Self {
            id: instance.id.clone(),
            address: format!("{}:{}", instance.address, instance.port),
            metadata,
        }
    }

    /// The TTL check id the feedback loop targets for this endpoint.
    pub fn check_id(&self) -> Option<&str> {
        self.metadata.get(CHECK_ID_KEY).map(String::as_str)
    }
}

// ── Registry records ──────────────────────────────────────────────

/// Status of a registry health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
}

impl CheckStatus {
    /// Registry wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Passing => "passing",
            CheckStatus::Warning => "warning",
            CheckStatus::Critical => "critical",
        }
    }

    /// Parse a registry wire name. Unknown values count as critical.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "passing" => CheckStatus::Passing,
            "warning" => CheckStatus::Warning,
            _ => CheckStatus::Critical,
        }
    }
}

/// A health check entry as returned by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub check_id: String,
    /// Instance id the check is attached to.
    pub service_id: String,
    pub service_name: String,
    pub status: CheckStatus,
}

/// A registered service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub service: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

// ── Registration ──────────────────────────────────────────────────

/// A TTL health check to register alongside an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSpec {
    pub check_id: String,
    pub ttl: Duration,
    /// Initial status.
    pub status: CheckStatus,
}

/// Everything needed to register one instance with the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub meta: BTreeMap<String, String>,
    pub check: CheckSpec,
}

impl InstanceSpec {
    /// Instance spec with a passing TTL check named `service:{id}`.
    pub fn with_ttl_check(
        id: &str,
        name: &str,
        address: &str,
        port: u16,
        ttl: Duration,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            address: address.to_string(),
            port,
            meta: BTreeMap::new(),
            check: CheckSpec {
                check_id: format!("service:{id}"),
                ttl,
                status: CheckStatus::Passing,
            },
        }
    }

    /// The instance record the registry will report once registered.
    pub fn to_record(&self) -> InstanceRecord {
        InstanceRecord {
            id: self.id.clone(),
            service: self.name.clone(),
            address: self.address.clone(),
            port: self.port,
            meta: self.meta.clone(),
        }
    }
}
