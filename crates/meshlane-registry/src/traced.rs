//! Operation tagging for registry calls.

use std::future::Future;

use async_trait::async_trait;
use tracing::{Instrument, debug, debug_span};

use meshlane_core::{CheckRecord, InstanceRecord, InstanceSpec};

use crate::client::RegistryClient;
use crate::error::{RegistryError, RegistryResult};

/// Wraps a registry client so that every call runs in a `registry`
/// span carrying an `op` field, and every error is tagged with the
/// operation that produced it.
#[derive(Debug, Clone)]
pub struct Traced<R> {
    inner: R,
}

impl<R: RegistryClient> Traced<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

async fn tagged<T>(
    op: &'static str,
    call: impl Future<Output = RegistryResult<T>>,
) -> RegistryResult<T> {
    async move {
        call.await.map_err(|e| {
            debug!(error = %e, "registry call failed");
            RegistryError::Op {
                op,
                source: Box::new(e),
            }
        })
    }
    .instrument(debug_span!("registry", op))
    .await
}

#[async_trait]
impl<R: RegistryClient> RegistryClient for Traced<R> {
    async fn query_passing_checks(&self, service: &str) -> RegistryResult<Vec<CheckRecord>> {
        tagged("query_passing_checks", self.inner.query_passing_checks(service)).await
    }

    async fn fetch_instance(&self, service_id: &str) -> RegistryResult<InstanceRecord> {
        tagged("fetch_instance", self.inner.fetch_instance(service_id)).await
    }

    async fn set_check_failing(&self, check_id: &str, note: &str) -> RegistryResult<()> {
        tagged("set_check_failing", self.inner.set_check_failing(check_id, note)).await
    }

    async fn set_check_passing(&self, check_id: &str, note: &str) -> RegistryResult<()> {
        tagged("set_check_passing", self.inner.set_check_passing(check_id, note)).await
    }

    async fn register_instance(&self, spec: &InstanceSpec) -> RegistryResult<()> {
        tagged("register_instance", self.inner.register_instance(spec)).await
    }

    async fn deregister_instance(&self, id: &str) -> RegistryResult<()> {
        tagged("deregister_instance", self.inner.deregister_instance(id)).await
    }
}
