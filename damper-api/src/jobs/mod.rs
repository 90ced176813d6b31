//! Background Jobs for DAMPER API
//!
//! - `cache_sweep`: evicts expired freshness-cache entries and prunes
//!   expired recency markers and closed-window rate-limit counters
//!
//! # Usage
//!
//! ```ignore
//! use damper_api::jobs::{cache_sweep_task, CacheSweepConfig};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(cache_sweep_task(Arc::clone(&governor), CacheSweepConfig::from_env(), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod cache_sweep;

pub use cache_sweep::{
    cache_sweep_task, sweep_once, CacheSweepConfig, CacheSweepMetrics, CacheSweepSnapshot,
};
