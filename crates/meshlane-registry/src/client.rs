//! The registry client trait.

use std::sync::Arc;

use async_trait::async_trait;

use meshlane_core::{CheckRecord, InstanceRecord, InstanceSpec};

use crate::error::RegistryResult;

/// Registry client shared between the refresher, the feedback loop and
/// self-registration.
pub type SharedRegistry = Arc<dyn RegistryClient>;

/// Operations meshlane needs from a service registry.
///
/// Implementations forward each call to the registry and hold no state
/// about the results.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Health checks of `service` whose status is passing.
    async fn query_passing_checks(&self, service: &str) -> RegistryResult<Vec<CheckRecord>>;

    /// The instance record a check's `service_id` points at.
    async fn fetch_instance(&self, service_id: &str) -> RegistryResult<InstanceRecord>;

    /// Mark a TTL check as failing.
    async fn set_check_failing(&self, check_id: &str, note: &str) -> RegistryResult<()>;

    /// Mark a TTL check as passing.
    async fn set_check_passing(&self, check_id: &str, note: &str) -> RegistryResult<()>;

    /// Register an instance together with its TTL check.
    async fn register_instance(&self, spec: &InstanceSpec) -> RegistryResult<()>;

    /// Remove an instance and the checks attached to it.
    async fn deregister_instance(&self, id: &str) -> RegistryResult<()>;
}
