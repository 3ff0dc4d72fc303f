//! meshlaned — the meshlane daemon.
//!
//! Assembles the registry client, discovery cache, breakers and health
//! feedback from `meshlane.toml`, keeps the cache fresh on an interval,
//! registers this process with the registry, and serves a small admin
//! API for inspection and manual refreshes.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness |
//! | GET | `/api/v1/services` | Configured services and cached endpoint counts |
//! | GET | `/api/v1/services/{name}/endpoints` | Cached endpoints of a service |
//! | GET | `/api/v1/services/{name}/next` | Pick the next endpoint |
//! | POST | `/api/v1/services/{name}/refresh` | Refresh one service |
//! | POST | `/api/v1/refresh` | Refresh every service |
//! | GET | `/api/v1/breakers` | Circuit breaker states |

pub mod api;
pub mod mesh;

pub use api::{ApiState, build_router};
pub use mesh::{Mesh, RegistryMode, build_registry, run_refresh_loop};
