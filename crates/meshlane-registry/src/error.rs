//! Registry error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors returned by a [`RegistryClient`](crate::RegistryClient).
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request timed out after {0:?}")]
    Timeout(Duration),

    #[error("registry transport error: {0}")]
    Transport(String),

    #[error("registry returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode registry response: {0}")]
    Decode(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{op}: {source}")]
    Op {
        op: &'static str,
        source: Box<RegistryError>,
    },
}

impl RegistryError {
    /// The innermost error, with operation tags peeled off.
    pub fn root(&self) -> &RegistryError {
        match self {
            RegistryError::Op { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the registry reported the target as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), RegistryError::NotFound(_))
    }
}
