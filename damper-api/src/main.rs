//! DAMPER API Server Entry Point
//!
//! Bootstraps configuration, opens the coordination store, spawns the cache
//! sweep and starts the Axum HTTP server.

use std::sync::Arc;

use damper_api::jobs::{cache_sweep_task, CacheSweepConfig};
use damper_api::telemetry::{init_tracing, TelemetryConfig};
use damper_api::{
    create_api_router_with_limits, ApiConfig, ApiError, ApiResult, AppState, RequestLimits,
};
use damper_core::{DamperError, GovernorConfig, SystemClock};
use damper_governor::{AdmissionDeps, Governor, RandomSampler};
use damper_storage::{
    InMemoryCounterStore, InMemoryDocumentStore, InMemoryRecencyStore, LmdbGovernorStore,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let api_config = ApiConfig::from_env()?;
    let governor_config = GovernorConfig::from_env();

    let (deps, backend) = admission_deps(&api_config)?;
    let documents = Arc::new(InMemoryDocumentStore::new());
    tracing::warn!("Source document store is in-memory and empty; invocations report notFound");
    let governor = Arc::new(Governor::new(governor_config, documents, deps)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = tokio::spawn(cache_sweep_task(
        Arc::clone(&governor),
        CacheSweepConfig::from_env(),
        shutdown_rx,
    ));

    let state = AppState::new(governor, backend);
    let app = create_api_router_with_limits(
        state,
        api_config.api_keys.clone(),
        RequestLimits::from(&api_config),
    );

    let addr = api_config.bind_addr()?;
    tracing::info!(%addr, backend, "Starting DAMPER API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweep.await {
        tracing::warn!(error = %e, "Cache sweep task ended abnormally");
    }
    Ok(())
}

/// Counters and recency markers live in LMDB when `DAMPER_LMDB_PATH` is set,
/// otherwise in process memory.
fn admission_deps(config: &ApiConfig) -> ApiResult<(AdmissionDeps, &'static str)> {
    let clock = Arc::new(SystemClock);
    let sampler = Arc::new(RandomSampler);

    match &config.lmdb_path {
        Some(path) => {
            let store = Arc::new(
                LmdbGovernorStore::open(path, config.lmdb_max_size_mb).map_err(DamperError::from)?,
            );
            tracing::info!(path = %path.display(), "Using LMDB coordination store");
            Ok((
                AdmissionDeps {
                    counters: store.clone(),
                    recency: store,
                    sampler,
                    clock,
                },
                "lmdb",
            ))
        }
        None => {
            tracing::warn!("DAMPER_LMDB_PATH not set; rate limits are per process");
            Ok((
                AdmissionDeps {
                    counters: Arc::new(InMemoryCounterStore::new()),
                    recency: Arc::new(InMemoryRecencyStore::new()),
                    sampler,
                    clock,
                },
                "memory",
            ))
        }
    }
}
