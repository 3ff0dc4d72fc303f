//! Pulls passing instances from the registry into the cache.
//!
//! Registry round-trips happen without any cache lock held; only the
//! final compare-and-swap takes the slot's write lock. A failed query
//! leaves the cached list untouched, so a registry outage never empties
//! a working cache.

use std::sync::Arc;

use tracing::{debug, info, warn};

use meshlane_core::Endpoint;
use meshlane_registry::SharedRegistry;

use crate::cache::{RefreshOutcome, ServiceCache};
use crate::error::{DiscoveryError, DiscoveryResult};

/// Services touched by a successful full refresh.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Refreshes cached endpoint lists from the registry.
///
/// Cheap to clone; clones share the cache and registry client.
#[derive(Clone)]
pub struct Refresher {
    cache: Arc<ServiceCache>,
    registry: SharedRegistry,
}

impl Refresher {
    pub fn new(cache: Arc<ServiceCache>, registry: SharedRegistry) -> Self {
        Self { cache, registry }
    }

    pub fn cache(&self) -> &Arc<ServiceCache> {
        &self.cache
    }

    /// Refresh one configured service.
    pub async fn refresh_one(&self, service: &str) -> DiscoveryResult<RefreshOutcome> {
        if !self.cache.is_defined(service) {
            return Err(DiscoveryError::UndefinedService(service.to_string()));
        }

        let endpoints = self.fetch_endpoints(service).await?;
        let outcome = self.cache.swap_if_changed(service, endpoints)?;

        if let RefreshOutcome::Updated { count } = outcome {
            info!(%service, endpoints = count, "endpoint list updated");
        }
        Ok(outcome)
    }

    /// Refresh every configured service.
    ///
    /// Failures do not stop the remaining services from refreshing. If
    /// any service failed, the error lists exactly those services, in
    /// configuration order.
    pub async fn refresh_all(&self) -> DiscoveryResult<RefreshReport> {
        let mut report = RefreshReport::default();
        let mut failures = Vec::new();

        for service in self.cache.services() {
            match self.refresh_one(service).await {
                Ok(RefreshOutcome::Updated { .. }) => report.updated.push(service.clone()),
                Ok(RefreshOutcome::Unchanged) => report.unchanged.push(service.clone()),
                Err(e) => {
                    warn!(%service, error = %e, "service refresh failed");
                    failures.push((service.clone(), e));
                }
            }
        }

        if failures.is_empty() {
            debug!(
                updated = report.updated.len(),
                unchanged = report.unchanged.len(),
                "refresh cycle complete"
            );
            Ok(report)
        } else {
            Err(DiscoveryError::PartialRefresh { failures })
        }
    }

    /// Start a background refresh of `service` without waiting for it.
    ///
    /// At most one background refresh per service runs at a time.
    /// Returns whether a refresh was started; outside a Tokio runtime
    /// nothing is started.
    pub fn trigger_refresh(&self, service: &str) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(%service, "no runtime available, skipping background refresh");
            return false;
        };
        if !self.cache.begin_refresh(service) {
            return false;
        }

        let in_flight = InFlight {
            cache: Arc::clone(&self.cache),
            service: service.to_string(),
        };
        let refresher = self.clone();
        handle.spawn(async move {
            let service = &in_flight.service;
            match refresher.refresh_one(service).await {
                Ok(_) => debug!(%service, "background refresh complete"),
                Err(e) => warn!(%service, error = %e, "background refresh failed"),
            }
        });
        true
    }

    /// Build the endpoint list from passing checks and their instances.
    async fn fetch_endpoints(&self, service: &str) -> DiscoveryResult<Vec<Endpoint>> {
        let query_error = |source| DiscoveryError::RegistryQuery {
            service: service.to_string(),
            source,
        };

        let checks = self
            .registry
            .query_passing_checks(service)
            .await
            .map_err(query_error)?;

        let mut endpoints = Vec::with_capacity(checks.len());
        for check in &checks {
            let instance = self
                .registry
                .fetch_instance(&check.service_id)
                .await
                .map_err(query_error)?;
            endpoints.push(Endpoint::from_records(service, check, &instance));
        }
        Ok(endpoints)
    }
}

/// Clears a service's in-flight refresh flag when dropped, so a task
/// that panics or is cancelled still releases it.
struct InFlight {
    cache: Arc<ServiceCache>,
    service: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.cache.end_refresh(&self.service);
    }
}
