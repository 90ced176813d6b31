//! DAMPER API - HTTP Surface for the Propagation Governor
//!
//! Exposes the governed operations over REST (Axum), together with health
//! checks, Prometheus metrics, an OpenAPI document and the background cache
//! sweep.

pub mod config;
pub mod constants;
pub mod error;
pub mod jobs;
pub mod macros;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod types;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use openapi::ApiDoc;
pub use routes::{create_api_router, create_api_router_with_limits, RequestLimits};
pub use state::AppState;
pub use types::*;
