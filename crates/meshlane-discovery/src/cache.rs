//! Per-service endpoint cache.
//!
//! One slot per configured service, created up front and never removed.
//! The set of slots is fixed at construction, so the map itself needs no
//! lock; each slot guards its `(endpoints, cursor)` pair with its own
//! `RwLock`, so services are refreshed and read independently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use meshlane_core::Endpoint;
use meshlane_core::config::DiscoveryConfig;

use crate::error::{DiscoveryError, DiscoveryResult};
use crate::strategy::{Cursor, SelectionStrategy, strategy_for};

/// Result of applying a freshly fetched endpoint list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The list changed; endpoints and cursor were replaced.
    Updated { count: usize },
    /// The list matched the cache; nothing was touched.
    Unchanged,
}

/// The endpoint list of one service and the cursor derived from it.
///
/// Always replaced as a whole.
struct Registration {
    endpoints: Arc<[Endpoint]>,
    cursor: Arc<dyn Cursor>,
}

struct Slot {
    /// `None` until the first successful refresh.
    registration: RwLock<Option<Registration>>,
    /// Set while a background first-use refresh is running.
    refreshing: AtomicBool,
}

impl Slot {
    fn new() -> Self {
        Self {
            registration: RwLock::new(None),
            refreshing: AtomicBool::new(false),
        }
    }
}

/// Healthy-endpoint cache for the configured services.
pub struct ServiceCache {
    slots: HashMap<String, Slot>,
    /// Service names in configuration order.
    services: Vec<String>,
    strategy: Arc<dyn SelectionStrategy>,
}

impl ServiceCache {
    /// Create a cache allowing exactly `services`.
    pub fn new<I, S>(services: I, strategy: Arc<dyn SelectionStrategy>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut slots = HashMap::new();
        let mut names = Vec::new();
        for name in services {
            let name = name.into();
            if slots.insert(name.clone(), Slot::new()).is_none() {
                names.push(name);
            }
        }
        Self {
            slots,
            services: names,
            strategy,
        }
    }

    /// Build a cache from the `[discovery]` config section.
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(config.services.iter().cloned(), strategy_for(config.strategy))
    }

    /// Configured service names, in configuration order.
    pub fn services(&self) -> &[String] {
        &self.services
    }

    pub fn is_defined(&self, service: &str) -> bool {
        self.slots.contains_key(service)
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    fn slot(&self, service: &str) -> DiscoveryResult<&Slot> {
        self.slots
            .get(service)
            .ok_or_else(|| DiscoveryError::UndefinedService(service.to_string()))
    }

    /// Cached endpoints of a service; `None` before the first refresh.
    pub fn snapshot(&self, service: &str) -> DiscoveryResult<Option<Arc<[Endpoint]>>> {
        let slot = self.slot(service)?;
        let registration = slot.registration.read().unwrap_or_else(PoisonError::into_inner);
        Ok(registration.as_ref().map(|r| Arc::clone(&r.endpoints)))
    }

    /// Current cursor of a service; `None` before the first refresh.
    ///
    /// The cursor carries its own endpoint list, so callers may use it
    /// after the read lock is released.
    pub fn cursor(&self, service: &str) -> DiscoveryResult<Option<Arc<dyn Cursor>>> {
        let slot = self.slot(service)?;
        let registration = slot.registration.read().unwrap_or_else(PoisonError::into_inner);
        Ok(registration.as_ref().map(|r| Arc::clone(&r.cursor)))
    }

    /// Replace the cached list and cursor if `endpoints` differs from the
    /// cached list (order-sensitive).
    ///
    /// An equal list leaves the existing cursor in place so its position
    /// is preserved.
    pub fn swap_if_changed(
        &self,
        service: &str,
        endpoints: Vec<Endpoint>,
    ) -> DiscoveryResult<RefreshOutcome> {
        let slot = self.slot(service)?;
        let mut registration = slot.registration.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(current) = registration.as_ref() {
            if *current.endpoints == endpoints[..] {
                debug!(%service, count = endpoints.len(), "endpoint list unchanged");
                return Ok(RefreshOutcome::Unchanged);
            }
        }

        let count = endpoints.len();
        let endpoints: Arc<[Endpoint]> = endpoints.into();
        let cursor = self.strategy.cursor(Arc::clone(&endpoints));
        *registration = Some(Registration { endpoints, cursor });

        Ok(RefreshOutcome::Updated { count })
    }

    /// Claim the background-refresh flag of a service.
    ///
    /// Returns `false` if a background refresh is already running.
    pub(crate) fn begin_refresh(&self, service: &str) -> bool {
        match self.slots.get(service) {
            Some(slot) => slot
                .refreshing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            None => false,
        }
    }

    pub(crate) fn end_refresh(&self, service: &str) {
        if let Some(slot) = self.slots.get(service) {
            slot.refreshing.store(false, Ordering::Release);
        }
    }
}
