//! Selection strategies and the cursors they produce.
//!
//! A strategy turns one endpoint list into a [`Cursor`]. The cursor is
//! bound to that list for its whole life; when the list changes the
//! cache asks the strategy for a new cursor and drops the old one.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use thiserror::Error;

use meshlane_core::Endpoint;
use meshlane_core::config::StrategyKind;

/// A cursor failed to produce an endpoint.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct SelectionError(String);

impl SelectionError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Stateful "next endpoint" generator over a fixed endpoint list.
pub trait Cursor: Send + Sync {
    /// Select the next endpoint.
    fn next(&self) -> Result<Endpoint, SelectionError>;

    /// The list this cursor selects from.
    fn endpoints(&self) -> &[Endpoint];
}

/// Builds cursors for endpoint lists.
pub trait SelectionStrategy: Send + Sync {
    /// Config name of the strategy.
    fn name(&self) -> &'static str;

    /// A fresh cursor bound to `endpoints`.
    fn cursor(&self, endpoints: Arc<[Endpoint]>) -> Arc<dyn Cursor>;
}

/// Strategy for a configured [`StrategyKind`].
pub fn strategy_for(kind: StrategyKind) -> Arc<dyn SelectionStrategy> {
    match kind {
        StrategyKind::RoundRobin => Arc::new(RoundRobin),
        StrategyKind::Random => Arc::new(Random),
    }
}

// ── Round robin ───────────────────────────────────────────────────

/// Cycles through the list in order, one full pass before repeating.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl SelectionStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn cursor(&self, endpoints: Arc<[Endpoint]>) -> Arc<dyn Cursor> {
        Arc::new(RoundRobinCursor::new(endpoints))
    }
}

/// Lock-free round-robin cursor.
///
/// Uses an `AtomicUsize` counter, so concurrent callers each get a
/// distinct position and a full pass hands out every endpoint once.
pub struct RoundRobinCursor {
    endpoints: Arc<[Endpoint]>,
    counter: AtomicUsize,
}

impl RoundRobinCursor {
    pub fn new(endpoints: Arc<[Endpoint]>) -> Self {
        Self {
            endpoints,
            counter: AtomicUsize::new(0),
        }
    }

    /// Number of selections made so far.
    pub fn position(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Cursor for RoundRobinCursor {
    fn next(&self) -> Result<Endpoint, SelectionError> {
        if self.endpoints.is_empty() {
            return Err(SelectionError::new("cursor has no endpoints"));
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        Ok(self.endpoints[idx].clone())
    }

    fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }
}

// ── Random ────────────────────────────────────────────────────────

/// Uniform random selection with replacement.
#[derive(Debug, Clone, Copy, Default)]
pub struct Random;

impl SelectionStrategy for Random {
    fn name(&self) -> &'static str {
        "random"
    }

    fn cursor(&self, endpoints: Arc<[Endpoint]>) -> Arc<dyn Cursor> {
        Arc::new(RandomCursor { endpoints })
    }
}

pub struct RandomCursor {
    endpoints: Arc<[Endpoint]>,
}

impl Cursor for RandomCursor {
    fn next(&self) -> Result<Endpoint, SelectionError> {
        if self.endpoints.is_empty() {
            return Err(SelectionError::new("cursor has no endpoints"));
        }
        let idx = rand::thread_rng().gen_range(0..self.endpoints.len());
        Ok(self.endpoints[idx].clone())
    }

    fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }
}
