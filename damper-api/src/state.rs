//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use damper_governor::Governor;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub governor: Arc<Governor>,
    /// Label reported by the readiness check ("lmdb" or "memory").
    pub backend: &'static str,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(governor: Arc<Governor>, backend: &'static str) -> Self {
        Self {
            governor,
            backend,
            start_time: Instant::now(),
        }
    }
}

crate::impl_from_ref!(Arc<Governor>, governor);
crate::impl_from_ref!(Instant, start_time);
