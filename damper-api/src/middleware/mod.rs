//! Middleware modules for DAMPER API
//!
//! - `auth`: API key authentication for `/api/v1/*`
//!
//! Health and metrics routes are mounted outside the auth layer.

mod auth;

pub use auth::{auth_middleware, AuthMiddlewareError, AuthMiddlewareState};
