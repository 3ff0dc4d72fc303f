//! Self-registration of this process with the registry.
//!
//! `register_self` is called once during startup and its failure is
//! fatal to the process. `deregister_self` is called once during
//! graceful shutdown and is best-effort: the long-TTL check lapses on
//! its own if deregistration never reaches the registry.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use meshlane_core::InstanceSpec;

use crate::client::SharedRegistry;
use crate::error::RegistryResult;

/// Registers and deregisters this process with the registry.
pub struct SelfRegistration {
    registry: SharedRegistry,
    spec: InstanceSpec,
    registered: AtomicBool,
}

impl SelfRegistration {
    pub fn new(registry: SharedRegistry, spec: InstanceSpec) -> Self {
        Self {
            registry,
            spec,
            registered: AtomicBool::new(false),
        }
    }

    /// The instance this process registers as.
    pub fn spec(&self) -> &InstanceSpec {
        &self.spec
    }

    /// Whether the last lifecycle call left this process registered.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Register the instance and its passing TTL check.
    ///
    /// Registration is an upsert on the registry side, so calling this
    /// again re-applies the same spec.
    pub async fn register_self(&self) -> RegistryResult<()> {
        self.registry.register_instance(&self.spec).await?;
        self.registered.store(true, Ordering::Release);
        info!(
            id = %self.spec.id,
            service = %self.spec.name,
            address = %self.spec.address,
            port = self.spec.port,
            check_id = %self.spec.check.check_id,
            ttl_secs = self.spec.check.ttl.as_secs(),
            "registered with service registry"
        );
        Ok(())
    }

    /// Remove the instance from the registry.
    ///
    /// An instance the registry no longer knows about counts as
    /// deregistered.
    pub async fn deregister_self(&self) -> RegistryResult<()> {
        match self.registry.deregister_instance(&self.spec.id).await {
            Ok(()) => {
                info!(id = %self.spec.id, "deregistered from service registry");
            }
            Err(e) if e.is_not_found() => {
                warn!(id = %self.spec.id, "instance already absent from registry");
            }
            Err(e) => return Err(e),
        }
        self.registered.store(false, Ordering::Release);
        Ok(())
    }
}
