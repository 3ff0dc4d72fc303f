//! Errors of guarded calls.

use std::time::Duration;

use thiserror::Error;

use meshlane_discovery::DiscoveryError;

/// Error type of the remote call a [`GuardedCaller`](crate::GuardedCaller) wraps.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for guarded calls.
pub type BreakerResult<T> = Result<T, BreakerError>;

#[derive(Debug, Error)]
pub enum BreakerError {
    /// No endpoint could be picked for the service.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// The endpoint's breaker is open; the call was not attempted.
    #[error("circuit breaker open for endpoint {endpoint}")]
    Open { endpoint: String },

    #[error("call to endpoint {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("call to endpoint {endpoint} failed: {source}")]
    Call { endpoint: String, source: BoxError },
}

impl BreakerError {
    /// Endpoint the failed call was aimed at, if one was picked.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::Discovery(_) => None,
            Self::Open { endpoint }
            | Self::Timeout { endpoint, .. }
            | Self::Call { endpoint, .. } => Some(endpoint),
        }
    }

    /// Whether the caller should answer "service temporarily unavailable".
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Discovery(e) => e.is_unavailable(),
            Self::Open { .. } => true,
            Self::Timeout { .. } | Self::Call { .. } => false,
        }
    }
}
