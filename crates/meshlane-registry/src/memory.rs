//! In-memory registry.
//!
//! Keeps instances and their TTL checks in a mutex-guarded table. Used
//! by tests and by the daemon's local development mode. TTLs are
//! recorded but never expire.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use meshlane_core::{CheckRecord, CheckStatus, InstanceRecord, InstanceSpec};

use crate::client::RegistryClient;
use crate::error::{RegistryError, RegistryResult};

/// One registered instance with its single TTL check.
#[derive(Debug, Clone)]
struct Entry {
    instance: InstanceRecord,
    check_id: String,
    status: CheckStatus,
    ttl: Duration,
    note: Option<String>,
}

/// A registry held entirely in process memory.
///
/// Cloning shares the underlying table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    /// Entries in registration order.
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current status of a check, if registered.
    pub fn check_status(&self, check_id: &str) -> Option<CheckStatus> {
        self.lock()
            .iter()
            .find(|e| e.check_id == check_id)
            .map(|e| e.status)
    }

    /// Last note attached to a check by a status update.
    pub fn check_note(&self, check_id: &str) -> Option<String> {
        self.lock()
            .iter()
            .find(|e| e.check_id == check_id)
            .and_then(|e| e.note.clone())
    }

    /// Registered TTL of a check.
    pub fn check_ttl(&self, check_id: &str) -> Option<Duration> {
        self.lock()
            .iter()
            .find(|e| e.check_id == check_id)
            .map(|e| e.ttl)
    }

    /// Whether an instance with this id is registered.
    pub fn contains_instance(&self, id: &str) -> bool {
        self.lock().iter().any(|e| e.instance.id == id)
    }

    /// Number of registered instances of `service`, regardless of health.
    pub fn instance_count(&self, service: &str) -> usize {
        self.lock()
            .iter()
            .filter(|e| e.instance.service == service)
            .count()
    }

    fn set_status(&self, check_id: &str, status: CheckStatus, note: &str) -> RegistryResult<()> {
        let mut entries = self.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.check_id == check_id)
            .ok_or_else(|| RegistryError::NotFound(format!("check {check_id}")))?;
        entry.status = status;
        entry.note = (!note.is_empty()).then(|| note.to_string());
        debug!(%check_id, status = status.as_str(), "check status updated");
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn query_passing_checks(&self, service: &str) -> RegistryResult<Vec<CheckRecord>> {
        Ok(self
            .lock()
            .iter()
            .filter(|e| e.instance.service == service && e.status == CheckStatus::Passing)
            .map(|e| CheckRecord {
                check_id: e.check_id.clone(),
                service_id: e.instance.id.clone(),
                service_name: e.instance.service.clone(),
                status: e.status,
            })
            .collect())
    }

    async fn fetch_instance(&self, service_id: &str) -> RegistryResult<InstanceRecord> {
        self.lock()
            .iter()
            .find(|e| e.instance.id == service_id)
            .map(|e| e.instance.clone())
            .ok_or_else(|| RegistryError::NotFound(format!("instance {service_id}")))
    }

    async fn set_check_failing(&self, check_id: &str, note: &str) -> RegistryResult<()> {
        self.set_status(check_id, CheckStatus::Critical, note)
    }

    async fn set_check_passing(&self, check_id: &str, note: &str) -> RegistryResult<()> {
        self.set_status(check_id, CheckStatus::Passing, note)
    }

    async fn register_instance(&self, spec: &InstanceSpec) -> RegistryResult<()> {
        let entry = Entry {
            instance: spec.to_record(),
            check_id: spec.check.check_id.clone(),
            status: spec.check.status,
            ttl: spec.check.ttl,
            note: None,
        };

        let mut entries = self.lock();
        // Re-registering an id replaces it in place, keeping its position.
        match entries.iter_mut().find(|e| e.instance.id == spec.id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        debug!(id = %spec.id, service = %spec.name, "instance registered");
        Ok(())
    }

    async fn deregister_instance(&self, id: &str) -> RegistryResult<()> {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| e.instance.id != id);
        if entries.len() == before {
            return Err(RegistryError::NotFound(format!("instance {id}")));
        }
        debug!(%id, "instance deregistered");
        Ok(())
    }
}
