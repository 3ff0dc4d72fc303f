//! meshlane-breaker — circuit breakers that feed back into registry health.
//!
//! Each concrete endpoint gets its own circuit breaker. When a breaker
//! trips, the endpoint's TTL health check is marked failing so that every
//! other caller drops it on their next refresh, and a self-heal timer
//! marks it passing again once the breaker's cool-down has elapsed.
//!
//! # Architecture
//!
//! ```text
//! GuardedCaller::call(service, f)
//!   ├── Picker::get_next(service)          → Endpoint
//!   ├── BreakerSet::get_or_create(id)      → Arc<CircuitBreaker>
//!   ├── f(endpoint) under call_timeout
//!   └── on Closed/HalfOpen → Open:
//!         HealthFeedback::on_breaker_open(endpoint, transition)
//!           ├── deadline = now + cooldown
//!           ├── set_check_failing(check_id)   (best-effort)
//!           └── spawn: sleep_until(deadline) → set_check_passing(check_id)
//! ```
//!
//! # Self-heal
//!
//! The passing update is optimistic. It fires exactly once per Open
//! transition whether or not the endpoint actually recovered. If it has
//! not, the next failing calls re-open the breaker and repeat the cycle.

pub mod breaker;
pub mod error;
pub mod feedback;
pub mod guard;
pub mod set;

pub use breaker::{BreakerSettings, BreakerState, CircuitBreaker, Transition};
pub use error::{BoxError, BreakerError, BreakerResult};
pub use feedback::HealthFeedback;
pub use guard::GuardedCaller;
pub use set::BreakerSet;
