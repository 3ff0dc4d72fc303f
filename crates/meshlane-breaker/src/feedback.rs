//! Breaker-to-health feedback.
//!
//! Registry errors are logged and swallowed here: the local breaker
//! already stops traffic to the endpoint whether or not the registry
//! acknowledges the check update.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use meshlane_core::Endpoint;
use meshlane_registry::SharedRegistry;

use crate::breaker::{BreakerSettings, Transition};

/// Flips an endpoint's TTL check to failing when its breaker opens and
/// back to passing after the cool-down.
#[derive(Clone)]
pub struct HealthFeedback {
    registry: SharedRegistry,
    cooldown: Duration,
}

impl HealthFeedback {
    pub fn new(registry: SharedRegistry, settings: &BreakerSettings) -> Self {
        Self {
            registry,
            cooldown: settings.cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Handle a breaker transition to Open for `endpoint`.
    ///
    /// Marks the endpoint's check failing, then schedules exactly one
    /// passing update for one cool-down after the transition, which is
    /// when the local breaker admits its trial call. The timer is
    /// scheduled even if the failing update did not reach the registry.
    /// Returns the timer task, or `None` if the endpoint carries no
    /// check id or `transition` is not an open.
    pub async fn on_breaker_open(
        &self,
        endpoint: &Endpoint,
        transition: Transition,
    ) -> Option<JoinHandle<()>> {
        // Fixed before the failing update so registry latency does not
        // delay the heal.
        let deadline = Instant::now() + self.cooldown;

        let note = failing_note(transition)?;
        let Some(check_id) = endpoint.check_id() else {
            warn!(endpoint = %endpoint.id, "endpoint has no check id, skipping health feedback");
            return None;
        };

        match self.registry.set_check_failing(check_id, &note).await {
            Ok(()) => info!(
                endpoint = %endpoint.id,
                %check_id,
                "health check marked failing"
            ),
            Err(e) => warn!(
                endpoint = %endpoint.id,
                %check_id,
                error = %e,
                "failed to mark health check failing"
            ),
        }

        Some(self.schedule_self_heal(endpoint.id.clone(), check_id.to_string(), deadline))
    }

    fn schedule_self_heal(
        &self,
        endpoint_id: String,
        check_id: String,
        deadline: Instant,
    ) -> JoinHandle<()> {
        let registry = SharedRegistry::clone(&self.registry);
        let note = format!("circuit breaker cool-down of {:?} elapsed", self.cooldown);

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            match registry.set_check_passing(&check_id, &note).await {
                Ok(()) => info!(
                    endpoint = %endpoint_id,
                    %check_id,
                    "health check restored to passing"
                ),
                // Instance deregistered in the meantime.
                Err(e) if e.is_not_found() => debug!(
                    endpoint = %endpoint_id,
                    %check_id,
                    "check no longer registered, self-heal skipped"
                ),
                Err(e) => warn!(
                    endpoint = %endpoint_id,
                    %check_id,
                    error = %e,
                    "failed to restore health check"
                ),
            }
        })
    }
}

fn failing_note(transition: Transition) -> Option<String> {
    match transition {
        Transition::Opened {
            consecutive_failures,
        } => Some(format!(
            "circuit breaker opened after {consecutive_failures} consecutive failures"
        )),
        Transition::Reopened => Some("circuit breaker re-opened after a failed trial call".to_string()),
        Transition::Closed => None,
    }
}
