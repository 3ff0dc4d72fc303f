//! meshlane-discovery — service discovery over a health-checking registry.
//!
//! Keeps, per configured service, the list of endpoints whose registry
//! health check is passing, and hands them out to callers through a
//! pluggable selection strategy.
//!
//! # Architecture
//!
//! ```text
//! Picker::get_next(service)            (hot path, never does I/O)
//!   └── ServiceCache
//!         └── per-service slot: RwLock<Option<Registration>>
//!               ├── endpoints: Arc<[Endpoint]>
//!               └── cursor:    Arc<dyn Cursor>   (bound to endpoints)
//!
//! Refresher::refresh_one / refresh_all (registry I/O, no lock held)
//!   ├── RegistryClient::query_passing_checks + fetch_instance
//!   └── ServiceCache::swap_if_changed     (write lock, compare-and-swap)
//! ```
//!
//! # Consistency
//!
//! A cursor owns the endpoint list it was built from, and the pair is
//! replaced as a unit under the slot's write lock. A reader therefore
//! always selects from the list its cursor was derived from. A refresh
//! that observes the same list as the cache leaves the existing cursor
//! (and its round-robin position) in place.

pub mod cache;
pub mod error;
pub mod picker;
pub mod refresher;
pub mod strategy;

pub use cache::{RefreshOutcome, ServiceCache};
pub use error::{DiscoveryError, DiscoveryResult};
pub use picker::Picker;
pub use refresher::{RefreshReport, Refresher};
pub use strategy::{
    Cursor, Random, RoundRobin, SelectionError, SelectionStrategy, strategy_for,
};
