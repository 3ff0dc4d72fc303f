//! Call-site wrapper: pick an endpoint, guard the call with its breaker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use meshlane_core::Endpoint;
use meshlane_discovery::Picker;

use crate::error::{BoxError, BreakerError, BreakerResult};
use crate::feedback::HealthFeedback;
use crate::set::BreakerSet;

/// Runs remote calls against a discovered endpoint behind that
/// endpoint's circuit breaker.
#[derive(Clone)]
pub struct GuardedCaller {
    picker: Picker,
    breakers: Arc<BreakerSet>,
    feedback: HealthFeedback,
    call_timeout: Duration,
}

impl GuardedCaller {
    pub fn new(
        picker: Picker,
        breakers: Arc<BreakerSet>,
        feedback: HealthFeedback,
        call_timeout: Duration,
    ) -> Self {
        Self {
            picker,
            breakers,
            feedback,
            call_timeout,
        }
    }

    pub fn breakers(&self) -> &Arc<BreakerSet> {
        &self.breakers
    }

    /// Call `f` with the next endpoint of `service`.
    ///
    /// An open breaker rejects the call without running `f`. A timeout
    /// or an error from `f` counts as a failure; if it trips the breaker,
    /// the endpoint's health check is marked failing before returning.
    pub async fn call<F, Fut, T, E>(&self, service: &str, f: F) -> BreakerResult<T>
    where
        F: FnOnce(Endpoint) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let endpoint = self.picker.get_next(service)?;
        let breaker = self.breakers.get_or_create(&endpoint.id);

        if !breaker.allow() {
            debug!(%service, endpoint = %endpoint.id, "call rejected by open breaker");
            return Err(BreakerError::Open {
                endpoint: endpoint.id,
            });
        }

        let err = match tokio::time::timeout(self.call_timeout, f(endpoint.clone())).await {
            Ok(Ok(value)) => {
                breaker.record_success();
                return Ok(value);
            }
            Ok(Err(e)) => BreakerError::Call {
                endpoint: endpoint.id.clone(),
                source: e.into(),
            },
            Err(_) => BreakerError::Timeout {
                endpoint: endpoint.id.clone(),
                timeout: self.call_timeout,
            },
        };

        debug!(%service, endpoint = %endpoint.id, error = %err, "guarded call failed");
        if let Some(transition) = breaker.record_failure().filter(|t| t.is_open()) {
            self.feedback.on_breaker_open(&endpoint, transition).await;
        }
        Err(err)
    }
}
