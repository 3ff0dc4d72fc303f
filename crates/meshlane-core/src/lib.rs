//! meshlane-core — shared types and configuration for meshlane.
//!
//! Holds the value types that flow between the registry adapter, the
//! discovery cache and the breaker feedback loop, plus the
//! `meshlane.toml` configuration model.

pub mod config;
pub mod duration;
pub mod types;

pub use config::{ConfigError, MeshConfig};
pub use duration::parse_duration;
pub use types::*;
