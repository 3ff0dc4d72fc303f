//! meshlane-registry — the boundary to the external service registry.
//!
//! Every registry interaction goes through the [`RegistryClient`] trait:
//! health-check queries for discovery, TTL check updates for breaker
//! feedback, and instance (de)registration for this process itself.
//!
//! # Architecture
//!
//! ```text
//! Traced<R>                      (op tag + tracing span per call)
//!   └── R: RegistryClient
//!         ├── HttpRegistry       (Consul-compatible agent/health API)
//!         └── InMemoryRegistry   (tests, local development)
//!
//! SelfRegistration               (register_self / deregister_self)
//!   └── SharedRegistry
//! ```
//!
//! The adapter keeps no state of its own and never retries. Callers
//! decide retry cadence; the HTTP adapter bounds every request with the
//! configured timeout.

pub mod client;
pub mod consul;
pub mod error;
pub mod memory;
pub mod registration;
pub mod traced;

pub use client::{RegistryClient, SharedRegistry};
pub use consul::HttpRegistry;
pub use error::{RegistryError, RegistryResult};
pub use memory::InMemoryRegistry;
pub use registration::SelfRegistration;
pub use traced::Traced;
