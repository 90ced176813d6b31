//! Cache Sweep Background Task
//!
//! Periodically evicts expired entries from every operation's freshness
//! cache (trimming the least recently used share when a cache is still over
//! capacity) and, optionally, prunes recency markers whose TTL elapsed and
//! rate-limit counters of closed windows.
//!
//! # Configuration
//!
//! ```rust
//! use damper_api::jobs::CacheSweepConfig;
//! use std::time::Duration;
//!
//! let config = CacheSweepConfig {
//!     sweep_interval: Duration::from_secs(300), // Sweep every 5 minutes
//!     prune_recency: true,                       // Also drop expired markers
//!     prune_counters: true,                      // And closed-window counters
//! };
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use damper_governor::Governor;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::constants::DEFAULT_CACHE_SWEEP_INTERVAL_SECS;
use crate::telemetry::METRICS;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct CacheSweepConfig {
    /// How often to sweep (default: 5 minutes)
    pub sweep_interval: Duration,

    /// Whether to prune expired recency markers on each cycle
    /// (default: true)
    pub prune_recency: bool,

    /// Whether to prune counter records of closed windows on each cycle
    /// (default: true)
    pub prune_counters: bool,
}

impl Default for CacheSweepConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_CACHE_SWEEP_INTERVAL_SECS),
            prune_recency: true,
            prune_counters: true,
        }
    }
}

impl CacheSweepConfig {
    /// Create CacheSweepConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `DAMPER_CACHE_SWEEP_INTERVAL_SECS`: Sweep interval (default: 300)
    /// - `DAMPER_RECENCY_PRUNE`: Prune expired recency markers (default: true)
    /// - `DAMPER_COUNTER_PRUNE`: Prune closed-window counters (default: true)
    pub fn from_env() -> Self {
        let sweep_interval = Duration::from_secs(
            std::env::var("DAMPER_CACHE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_CACHE_SWEEP_INTERVAL_SECS),
        );

        let prune_recency = std::env::var("DAMPER_RECENCY_PRUNE")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        let prune_counters = std::env::var("DAMPER_COUNTER_PRUNE")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            sweep_interval,
            prune_recency,
            prune_counters,
        }
    }

    /// Short interval for development.
    pub fn development() -> Self {
        Self {
            sweep_interval: Duration::from_secs(10),
            prune_recency: true,
            prune_counters: true,
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct CacheSweepMetrics {
    /// Total sweep cycles completed
    pub sweep_cycles: AtomicU64,

    /// Entries removed because they aged past the freshness window
    pub entries_expired: AtomicU64,

    /// Entries removed by the over-capacity trim
    pub entries_trimmed: AtomicU64,

    /// Recency markers pruned
    pub markers_pruned: AtomicU64,

    /// Counter records of closed windows pruned
    pub counters_pruned: AtomicU64,

    /// Errors encountered while pruning
    pub sweep_errors: AtomicU64,
}

impl CacheSweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> CacheSweepSnapshot {
        CacheSweepSnapshot {
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
            entries_expired: self.entries_expired.load(Ordering::Relaxed),
            entries_trimmed: self.entries_trimmed.load(Ordering::Relaxed),
            markers_pruned: self.markers_pruned.load(Ordering::Relaxed),
            counters_pruned: self.counters_pruned.load(Ordering::Relaxed),
            sweep_errors: self.sweep_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweep metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSweepSnapshot {
    pub sweep_cycles: u64,
    pub entries_expired: u64,
    pub entries_trimmed: u64,
    pub markers_pruned: u64,
    pub counters_pruned: u64,
    pub sweep_errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that sweeps caches until the shutdown signal is received.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(cache_sweep_task(governor, CacheSweepConfig::from_env(), shutdown_rx));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn cache_sweep_task(
    governor: Arc<Governor>,
    config: CacheSweepConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<CacheSweepMetrics> {
    let metrics = Arc::new(CacheSweepMetrics::new());

    let mut sweep_interval = interval(config.sweep_interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        sweep_interval_secs = config.sweep_interval.as_secs(),
        prune_recency = config.prune_recency,
        prune_counters = config.prune_counters,
        "Cache sweep task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Cache sweep task shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                sweep_once(&governor, &config, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        sweep_cycles = snapshot.sweep_cycles,
        entries_expired = snapshot.entries_expired,
        entries_trimmed = snapshot.entries_trimmed,
        markers_pruned = snapshot.markers_pruned,
        counters_pruned = snapshot.counters_pruned,
        sweep_errors = snapshot.sweep_errors,
        "Cache sweep task completed"
    );

    metrics
}

/// Perform one sweep cycle.
pub async fn sweep_once(governor: &Governor, config: &CacheSweepConfig, metrics: &CacheSweepMetrics) {
    metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);

    let mut expired = 0u64;
    let mut trimmed = 0u64;
    let mut remaining = 0usize;
    for (kind, cache) in governor.caches() {
        let report = cache.sweep();
        tracing::debug!(
            operation = %kind,
            expired = report.expired,
            trimmed = report.trimmed,
            remaining = report.remaining,
            "Cache swept"
        );
        expired += report.expired as u64;
        trimmed += report.trimmed as u64;
        remaining += report.remaining;
    }
    metrics.entries_expired.fetch_add(expired, Ordering::Relaxed);
    metrics.entries_trimmed.fetch_add(trimmed, Ordering::Relaxed);
    if let Ok(prometheus) = METRICS.as_ref() {
        prometheus.record_cache_sweep(expired + trimmed, remaining);
    }

    let mut pruned = 0u64;
    if config.prune_recency {
        match governor.prune_recency().await {
            Ok(count) => {
                pruned = count;
                metrics.markers_pruned.fetch_add(count, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to prune recency markers");
                metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    let mut counters = 0u64;
    if config.prune_counters {
        match governor.prune_counters().await {
            Ok(count) => {
                counters = count;
                metrics.counters_pruned.fetch_add(count, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to prune rate-limit counters");
                metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    if expired > 0 || trimmed > 0 || pruned > 0 || counters > 0 {
        tracing::info!(expired, trimmed, pruned, counters, "Cache sweep cycle completed");
    } else {
        tracing::trace!("Cache sweep cycle completed with nothing to evict");
    }
}
