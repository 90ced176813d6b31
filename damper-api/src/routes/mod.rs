//! REST API Routes Module
//!
//! - Governed operation routes under `/api/v1/governed` (API key required)
//! - Health check endpoints (Kubernetes-compatible, no auth)
//! - Prometheus metrics and the OpenAPI document (no auth)

pub mod governed;
pub mod health;

use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tower::limit::ConcurrencyLimitLayer;
use tower::timeout::{error::Elapsed, TimeoutLayer};
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::config::ApiConfig;
use crate::constants::{API_PREFIX, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::error::ApiError;
use crate::middleware::{auth_middleware, AuthMiddlewareState};
use crate::openapi::ApiDoc;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

pub use governed::create_router as governed_router;
pub use health::create_router as health_router;

/// Server-wide bounds applied to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    pub timeout: Duration,
    pub concurrency_limit: Option<usize>,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            concurrency_limit: None,
        }
    }
}

impl From<&ApiConfig> for RequestLimits {
    fn from(config: &ApiConfig) -> Self {
        Self {
            timeout: config.request_timeout,
            concurrency_limit: config.concurrency_limit,
        }
    }
}

/// Handler for /openapi.json endpoint.
async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

/// Map middleware errors (timeouts) onto the API error shape.
async fn handle_middleware_error(err: BoxError) -> ApiError {
    if err.is::<Elapsed>() {
        tracing::warn!("Request exceeded timeout");
        ApiError::request_timeout("Request did not complete within the configured timeout")
    } else {
        tracing::error!(error = %err, "Unhandled middleware error");
        ApiError::internal_error("Unhandled middleware error")
    }
}

/// Build the complete HTTP router with default request limits.
///
/// `api_keys` guards the governed routes; pass an empty list for
/// development mode.
pub fn create_api_router(state: AppState, api_keys: Vec<String>) -> Router {
    create_api_router_with_limits(state, api_keys, RequestLimits::default())
}

/// Build the complete HTTP router.
pub fn create_api_router_with_limits(
    state: AppState,
    api_keys: Vec<String>,
    limits: RequestLimits,
) -> Router {
    let auth_state = AuthMiddlewareState::new(api_keys);
    if auth_state.is_dev_mode() {
        tracing::warn!("No API keys configured; governed routes are unauthenticated");
    }

    let governed_routes =
        governed::create_router().layer(from_fn_with_state(auth_state, auth_middleware));

    let router = Router::new()
        .nest(API_PREFIX, governed_routes)
        .nest("/health", health::create_router())
        .route("/metrics", get(metrics_handler))
        .route("/openapi.json", get(openapi_json))
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http());

    let router = match limits.concurrency_limit {
        Some(limit) => router.layer(ConcurrencyLimitLayer::new(limit)),
        None => router,
    };

    router
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .layer(TimeoutLayer::new(limits.timeout)),
        )
        .with_state(state)
}
