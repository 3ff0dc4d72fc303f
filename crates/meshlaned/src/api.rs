//! Admin API handlers.
//!
//! Every response uses the `{success, data?, error?}` envelope.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::Serialize;
use tracing::warn;

use meshlane_breaker::BreakerSet;
use meshlane_core::Endpoint;
use meshlane_discovery::{DiscoveryError, Picker, RefreshOutcome, Refresher};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub refresher: Refresher,
    pub picker: Picker,
    pub breakers: Arc<BreakerSet>,
}

/// Build the admin router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/services", get(list_services))
        .route("/services/{name}/endpoints", get(list_endpoints))
        .route("/services/{name}/next", get(next_endpoint))
        .route("/services/{name}/refresh", post(refresh_service))
        .route("/refresh", post(refresh_all))
        .route("/breakers", get(list_breakers))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(healthz))
}

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Status for a discovery error on the admin routes.
fn status_for(err: &DiscoveryError) -> StatusCode {
    match err {
        DiscoveryError::UndefinedService(_) => StatusCode::NOT_FOUND,
        DiscoveryError::RegistryQuery { .. } | DiscoveryError::PartialRefresh { .. } => {
            StatusCode::BAD_GATEWAY
        }
        DiscoveryError::UnavailableService(_) | DiscoveryError::NoHealthyNode(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        DiscoveryError::Selection { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Views ──────────────────────────────────────────────────────

#[derive(Serialize)]
struct ServiceView {
    name: String,
    /// `None` until the first successful refresh.
    endpoints: Option<usize>,
}

#[derive(Serialize)]
struct RefreshView {
    service: String,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoints: Option<usize>,
}

#[derive(Serialize)]
struct RefreshAllView {
    updated: Vec<String>,
    unchanged: Vec<String>,
}

#[derive(Serialize)]
struct BreakerView {
    endpoint: String,
    state: &'static str,
}

// ── Handlers ───────────────────────────────────────────────────

/// GET /healthz
async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

/// GET /api/v1/services
async fn list_services(State(state): State<ApiState>) -> impl IntoResponse {
    let cache = state.refresher.cache();
    let services: Vec<ServiceView> = cache
        .services()
        .iter()
        .map(|name| ServiceView {
            name: name.clone(),
            endpoints: cache.snapshot(name).ok().flatten().map(|eps| eps.len()),
        })
        .collect();
    ApiResponse::ok(services)
}

/// GET /api/v1/services/{name}/endpoints
async fn list_endpoints(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.refresher.cache().snapshot(&name) {
        Ok(Some(endpoints)) => ApiResponse::ok(endpoints.to_vec()).into_response(),
        Ok(None) => ApiResponse::ok(Vec::<Endpoint>::new()).into_response(),
        Err(e) => error_response(&e.to_string(), status_for(&e)).into_response(),
    }
}

/// GET /api/v1/services/{name}/next
///
/// Registry error text is never returned from this route.
async fn next_endpoint(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.picker.get_next(&name) {
        Ok(endpoint) => ApiResponse::ok(endpoint).into_response(),
        Err(e) if e.is_unavailable() => error_response(
            "service temporarily unavailable",
            StatusCode::SERVICE_UNAVAILABLE,
        )
        .into_response(),
        Err(e) => {
            warn!(service = %name, error = %e, "endpoint selection failed");
            error_response("endpoint selection failed", StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        }
    }
}

/// POST /api/v1/services/{name}/refresh
async fn refresh_service(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.refresher.refresh_one(&name).await {
        Ok(RefreshOutcome::Updated { count }) => ApiResponse::ok(RefreshView {
            service: name,
            outcome: "updated",
            endpoints: Some(count),
        })
        .into_response(),
        Ok(RefreshOutcome::Unchanged) => ApiResponse::ok(RefreshView {
            service: name,
            outcome: "unchanged",
            endpoints: None,
        })
        .into_response(),
        Err(e) => error_response(&e.to_string(), status_for(&e)).into_response(),
    }
}

/// POST /api/v1/refresh
async fn refresh_all(State(state): State<ApiState>) -> impl IntoResponse {
    match state.refresher.refresh_all().await {
        Ok(report) => ApiResponse::ok(RefreshAllView {
            updated: report.updated,
            unchanged: report.unchanged,
        })
        .into_response(),
        Err(e) => error_response(&e.to_string(), status_for(&e)).into_response(),
    }
}

/// GET /api/v1/breakers
async fn list_breakers(State(state): State<ApiState>) -> impl IntoResponse {
    let breakers: Vec<BreakerView> = state
        .breakers
        .snapshot()
        .into_iter()
        .map(|(endpoint, s)| BreakerView {
            endpoint,
            state: s.as_str(),
        })
        .collect();
    ApiResponse::ok(breakers)
}
