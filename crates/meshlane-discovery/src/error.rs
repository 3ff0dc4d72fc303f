//! Discovery error types.

use thiserror::Error;

use meshlane_registry::RegistryError;

use crate::strategy::SelectionError;

/// Result type alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors returned by the refresher and the picker.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The registry could not be queried. The cached list is unchanged.
    #[error("registry query failed for service {service}: {source}")]
    RegistryQuery {
        service: String,
        source: RegistryError,
    },

    /// The service is not in the configured allow-list.
    #[error("undefined service: {0}")]
    UndefinedService(String),

    /// No refresh of this service has succeeded yet.
    #[error("service {0} is not available yet")]
    UnavailableService(String),

    /// The registry reports no passing instance.
    #[error("no healthy node for service {0}")]
    NoHealthyNode(String),

    #[error("endpoint selection failed for service {service}: {source}")]
    Selection {
        service: String,
        source: SelectionError,
    },

    /// One or more services failed during a full refresh.
    #[error(
        "refresh failed for {} service(s): {}",
        .failures.len(),
        describe_failures(.failures)
    )]
    PartialRefresh {
        failures: Vec<(String, DiscoveryError)>,
    },
}

impl DiscoveryError {
    /// Whether callers should answer "service temporarily unavailable".
    ///
    /// Registry error text must not reach end users; callers map all of
    /// these to the same generic response.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            DiscoveryError::UndefinedService(_)
                | DiscoveryError::UnavailableService(_)
                | DiscoveryError::NoHealthyNode(_)
        )
    }

    /// Names of the services that failed, for a partial refresh.
    pub fn failed_services(&self) -> Vec<&str> {
        match self {
            DiscoveryError::PartialRefresh { failures } => {
                failures.iter().map(|(name, _)| name.as_str()).collect()
            }
            DiscoveryError::RegistryQuery { service, .. } => vec![service.as_str()],
            _ => Vec::new(),
        }
    }
}

fn describe_failures(failures: &[(String, DiscoveryError)]) -> String {
    failures
        .iter()
        .map(|(_, e)| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
