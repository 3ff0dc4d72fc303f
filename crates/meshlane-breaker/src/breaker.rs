//! Circuit breaker state machine.
//!
//! Closed → Open after `failure_threshold` consecutive failures.
//! Open → HalfOpen once `cooldown` has elapsed since opening.
//! HalfOpen → Closed after `success_threshold` consecutive successes,
//! or back to Open on the first failure.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use meshlane_core::config::BreakerConfig;

/// Breaker state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the cool-down elapses.
    Open,
    /// Trial calls are let through to probe recovery.
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change caused by recording a call result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The breaker tripped from Closed.
    Opened { consecutive_failures: u32 },
    /// A half-open trial call failed and the breaker tripped again.
    Reopened,
    /// The breaker recovered from HalfOpen.
    Closed,
}

impl Transition {
    /// True for both ways of entering Open.
    pub fn is_open(self) -> bool {
        !matches!(self, Self::Closed)
    }
}

/// Thresholds shared by every breaker of a [`BreakerSet`](crate::BreakerSet).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown: Duration,
}

impl BreakerSettings {
    pub fn from_config(config: &BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            cooldown: config.cooldown(),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from_config(&BreakerConfig::default())
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

/// One endpoint's circuit breaker.
///
/// Internally synchronized; shared between callers as `Arc<CircuitBreaker>`.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state. An Open breaker whose cool-down has elapsed
    /// reports HalfOpen.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.promote(&mut inner);
        inner.state
    }

    /// Whether a call may proceed right now.
    pub fn allow(&self) -> bool {
        let mut inner = self.lock();
        self.promote(&mut inner);
        inner.state != BreakerState::Open
    }

    /// Record a successful call.
    pub fn record_success(&self) -> Option<Transition> {
        let mut inner = self.lock();
        self.promote(&mut inner);

        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
                None
            }
            BreakerState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.settings.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                    info!(breaker = %self.name, "circuit breaker closed");
                    Some(Transition::Closed)
                } else {
                    None
                }
            }
            // A call admitted before the breaker opened finished late.
            BreakerState::Open => None,
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) -> Option<Transition> {
        let mut inner = self.lock();
        self.promote(&mut inner);

        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.settings.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        threshold = self.settings.failure_threshold,
                        "circuit breaker opened"
                    );
                    let consecutive_failures = inner.consecutive_failures;
                    self.trip(&mut inner);
                    Some(Transition::Opened {
                        consecutive_failures,
                    })
                } else {
                    None
                }
            }
            BreakerState::HalfOpen => {
                warn!(breaker = %self.name, "trial call failed, circuit breaker re-opened");
                self.trip(&mut inner);
                Some(Transition::Reopened)
            }
            BreakerState::Open => None,
        }
    }

    fn trip(&self, inner: &mut Inner) {
        inner.state = BreakerState::Open;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_at = Some(Instant::now());
    }

    fn promote(&self, inner: &mut Inner) {
        if inner.state != BreakerState::Open {
            return;
        }
        let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
        if elapsed >= self.settings.cooldown {
            debug!(breaker = %self.name, "cool-down elapsed, circuit breaker half-open");
            inner.state = BreakerState::HalfOpen;
            inner.consecutive_successes = 0;
        }
    }
}
