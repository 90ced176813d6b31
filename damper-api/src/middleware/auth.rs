//! Axum Middleware for API Key Authentication
//!
//! Checks the `x-api-key` header against the configured key list. An empty
//! key list means development mode: every request is let through.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::constants::API_KEY_HEADER;
use crate::error::ApiError;

// ============================================================================
// MIDDLEWARE STATE
// ============================================================================

/// Shared state for authentication middleware.
#[derive(Debug, Clone, Default)]
pub struct AuthMiddlewareState {
    api_keys: Arc<Vec<String>>,
}

impl AuthMiddlewareState {
    pub fn new(api_keys: Vec<String>) -> Self {
        Self {
            api_keys: Arc::new(api_keys),
        }
    }

    pub fn is_dev_mode(&self) -> bool {
        self.api_keys.is_empty()
    }

    fn accepts(&self, key: &str) -> bool {
        self.api_keys.iter().any(|k| k == key)
    }
}

// ============================================================================
// MIDDLEWARE FUNCTION
// ============================================================================

/// Reject requests without a configured API key.
///
/// # Example
///
/// ```ignore
/// use axum::{Router, middleware};
/// use damper_api::middleware::{auth_middleware, AuthMiddlewareState};
///
/// let auth_state = AuthMiddlewareState::new(vec!["secret".to_string()]);
/// let app = Router::new()
///     .route("/api/v1/governed/status-check", axum::routing::post(handler))
///     .layer(middleware::from_fn_with_state(auth_state, auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    if state.is_dev_mode() {
        return Ok(next.run(request).await);
    }

    let api_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    match api_key {
        Some(key) if state.accepts(key) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "Rejected request with unknown API key");
            Err(AuthMiddlewareError(ApiError::unauthorized("Invalid API key")))
        }
        None => Err(AuthMiddlewareError(ApiError::unauthorized(
            "Authentication required: provide X-API-Key header",
        ))),
    }
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Error wrapper for middleware that implements IntoResponse.
#[derive(Debug)]
pub struct AuthMiddlewareError(pub ApiError);

impl IntoResponse for AuthMiddlewareError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}
