//! Per-endpoint breaker map.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::breaker::{BreakerSettings, BreakerState, CircuitBreaker};

/// Lazily created circuit breakers, one per endpoint id.
///
/// Entries are never evicted; the map grows with the number of distinct
/// endpoint ids seen, which is bounded by the fleet size.
#[derive(Debug)]
pub struct BreakerSet {
    settings: BreakerSettings,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerSet {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// The breaker for `endpoint_id`, created on first use.
    pub fn get_or_create(&self, endpoint_id: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(breaker) = breakers.get(endpoint_id) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        let breaker = breakers.entry(endpoint_id.to_string()).or_insert_with(|| {
            debug!(endpoint = %endpoint_id, "creating circuit breaker");
            Arc::new(CircuitBreaker::new(endpoint_id, self.settings))
        });
        Arc::clone(breaker)
    }

    pub fn get(&self, endpoint_id: &str) -> Option<Arc<CircuitBreaker>> {
        let breakers = self.breakers.read().unwrap_or_else(PoisonError::into_inner);
        breakers.get(endpoint_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.breakers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current state of every breaker, sorted by endpoint id.
    pub fn snapshot(&self) -> Vec<(String, BreakerState)> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut entries: Vec<(String, BreakerState)> = breakers
            .iter()
            .map(|b| (b.name().to_string(), b.state()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
