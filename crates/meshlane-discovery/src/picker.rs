//! Per-request endpoint lookup.

use std::sync::Arc;

use tracing::{debug, trace};

use meshlane_core::Endpoint;

use crate::cache::ServiceCache;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::refresher::Refresher;

/// Hands out the next endpoint of a service.
///
/// Never performs registry I/O on the caller's task. The only side
/// effect besides cursor advancement is the background refresh started
/// when a service has not been populated yet.
#[derive(Clone)]
pub struct Picker {
    cache: Arc<ServiceCache>,
    refresher: Refresher,
}

impl Picker {
    pub fn new(refresher: Refresher) -> Self {
        Self {
            cache: Arc::clone(refresher.cache()),
            refresher,
        }
    }

    /// Select the next endpoint of `service`.
    ///
    /// # Errors
    ///
    /// - `UndefinedService` if `service` is not configured.
    /// - `UnavailableService` if no refresh of it has succeeded yet; a
    ///   background refresh is started so a later call can succeed.
    /// - `NoHealthyNode` if the registry reported no passing instance.
    /// - `Selection` if the strategy's cursor fails.
    pub fn get_next(&self, service: &str) -> DiscoveryResult<Endpoint> {
        let Some(cursor) = self.cache.cursor(service)? else {
            let started = self.refresher.trigger_refresh(service);
            debug!(%service, refresh_started = started, "service not populated yet");
            return Err(DiscoveryError::UnavailableService(service.to_string()));
        };

        if cursor.endpoints().is_empty() {
            return Err(DiscoveryError::NoHealthyNode(service.to_string()));
        }

        let endpoint = cursor.next().map_err(|source| DiscoveryError::Selection {
            service: service.to_string(),
            source,
        })?;
        trace!(%service, endpoint = %endpoint.id, "endpoint selected");
        Ok(endpoint)
    }
}
