//! Configuration types
//!
//! Every knob of every governed operation is externally tunable through
//! `DAMPER_<KIND>_*` environment variables, where `<KIND>` is one of
//! `SNAPSHOT_FANOUT`, `MIRROR_UPDATE`, `STATUS_CHECK`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, DamperError, DamperResult};
use crate::identity::OperationKind;

/// Largest number of writes the document store accepts in one batch commit.
pub const STORE_BATCH_LIMIT: usize = 500;

/// Fraction of entries evicted by a size-based trim.
pub const CACHE_TRIM_FRACTION: f64 = 0.3;

// ============================================================================
// POLICIES
// ============================================================================

/// Admission pipeline settings for one operation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionPolicy {
    /// Admitted calls per entity per window.
    pub per_entity_cap: u32,
    /// Admitted calls across all entities per window.
    pub global_cap: u32,
    /// Fixed window length (one hour by default).
    pub window: Duration,
    /// Probability that a non-forced call passes the sampler.
    pub sampling_rate: f64,
    /// How long a processed entity suppresses repeat processing.
    pub recency_ttl: Duration,
    /// Suppressed hits within one TTL at which a loop warning is logged.
    pub loop_alert_threshold: u32,
}

/// Bounded writer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritePolicy {
    pub max_batch_size: usize,
    pub max_concurrency: usize,
    pub inter_batch_delay: Duration,
}

/// Limits for the batch form of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPolicy {
    pub max_entities: usize,
    pub concurrency: usize,
    pub inter_batch_delay: Duration,
}

/// Freshness cache settings (status-check only by default).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub freshness_window: Duration,
    pub hard_cap_window: Duration,
    pub max_entries: usize,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            max_batch_size: 450,
            max_concurrency: 3,
            inter_batch_delay: Duration::from_millis(100),
        }
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_entities: 50,
            concurrency: 5,
            inter_batch_delay: Duration::from_millis(200),
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            freshness_window: Duration::from_secs(30 * 60),
            hard_cap_window: Duration::from_secs(60 * 60),
            max_entries: 1000,
        }
    }
}

// ============================================================================
// PER-OPERATION CONFIG
// ============================================================================

/// Full configuration of one governed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationConfig {
    pub kind: OperationKind,
    pub admission: AdmissionPolicy,
    pub write: WritePolicy,
    pub batch: BatchPolicy,
    /// `None` disables the cache short-circuit for this operation.
    pub cache: Option<CachePolicy>,
}

impl OperationConfig {
    /// Deploy-time defaults for each operation kind.
    pub fn defaults_for(kind: OperationKind) -> Self {
        let hour = Duration::from_secs(3600);
        let admission = match kind {
            OperationKind::SnapshotFanout => AdmissionPolicy {
                per_entity_cap: 5,
                global_cap: 500,
                window: hour,
                sampling_rate: 0.8,
                recency_ttl: Duration::from_secs(5 * 60),
                loop_alert_threshold: 3,
            },
            OperationKind::MirrorUpdate => AdmissionPolicy {
                per_entity_cap: 10,
                global_cap: 1000,
                window: hour,
                sampling_rate: 1.0,
                recency_ttl: Duration::from_secs(5 * 60),
                loop_alert_threshold: 3,
            },
            OperationKind::StatusCheck => AdmissionPolicy {
                per_entity_cap: 30,
                global_cap: 2000,
                window: hour,
                sampling_rate: 1.0,
                recency_ttl: Duration::from_secs(60),
                loop_alert_threshold: 5,
            },
        };
        let cache = match kind {
            OperationKind::StatusCheck => Some(CachePolicy::default()),
            _ => None,
        };

        Self {
            kind,
            admission,
            write: WritePolicy::default(),
            batch: BatchPolicy::default(),
            cache,
        }
    }

    /// Create from environment variables with fallback to `defaults_for(kind)`.
    ///
    /// Environment variables (prefix `DAMPER_<KIND>_`):
    /// - `PER_ENTITY_HOURLY_CAP`, `GLOBAL_HOURLY_CAP`, `WINDOW_SECS`
    /// - `SAMPLING_RATE`, `RECENCY_TTL_SECS`, `LOOP_ALERT_THRESHOLD`
    /// - `MAX_BATCH_SIZE`, `MAX_CONCURRENCY`, `INTER_BATCH_DELAY_MS`
    /// - `BATCH_MAX_ENTITIES`, `BATCH_CONCURRENCY`, `BATCH_DELAY_MS`
    /// - `CACHE_ENABLED`, `CACHE_FRESHNESS_SECS`, `CACHE_HARD_CAP_SECS`, `CACHE_MAX_ENTRIES`
    pub fn from_env(kind: OperationKind) -> Self {
        let defaults = Self::defaults_for(kind);
        let key = |suffix: &str| format!("DAMPER_{}_{}", kind.env_prefix(), suffix);

        let admission = AdmissionPolicy {
            per_entity_cap: env_parse(&key("PER_ENTITY_HOURLY_CAP"))
                .unwrap_or(defaults.admission.per_entity_cap),
            global_cap: env_parse(&key("GLOBAL_HOURLY_CAP"))
                .unwrap_or(defaults.admission.global_cap),
            window: env_parse(&key("WINDOW_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.admission.window),
            sampling_rate: env_parse(&key("SAMPLING_RATE"))
                .unwrap_or(defaults.admission.sampling_rate),
            recency_ttl: env_parse(&key("RECENCY_TTL_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.admission.recency_ttl),
            loop_alert_threshold: env_parse(&key("LOOP_ALERT_THRESHOLD"))
                .unwrap_or(defaults.admission.loop_alert_threshold),
        };

        let write = WritePolicy {
            max_batch_size: env_parse(&key("MAX_BATCH_SIZE"))
                .unwrap_or(defaults.write.max_batch_size),
            max_concurrency: env_parse(&key("MAX_CONCURRENCY"))
                .unwrap_or(defaults.write.max_concurrency),
            inter_batch_delay: env_parse(&key("INTER_BATCH_DELAY_MS"))
                .map(Duration::from_millis)
                .unwrap_or(defaults.write.inter_batch_delay),
        };

        let batch = BatchPolicy {
            max_entities: env_parse(&key("BATCH_MAX_ENTITIES"))
                .unwrap_or(defaults.batch.max_entities),
            concurrency: env_parse(&key("BATCH_CONCURRENCY"))
                .unwrap_or(defaults.batch.concurrency),
            inter_batch_delay: env_parse(&key("BATCH_DELAY_MS"))
                .map(Duration::from_millis)
                .unwrap_or(defaults.batch.inter_batch_delay),
        };

        let cache_enabled = std::env::var(key("CACHE_ENABLED"))
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.cache.is_some());
        let cache = cache_enabled.then(|| {
            let base = defaults.cache.clone().unwrap_or_default();
            CachePolicy {
                freshness_window: env_parse(&key("CACHE_FRESHNESS_SECS"))
                    .map(Duration::from_secs)
                    .unwrap_or(base.freshness_window),
                hard_cap_window: env_parse(&key("CACHE_HARD_CAP_SECS"))
                    .map(Duration::from_secs)
                    .unwrap_or(base.hard_cap_window),
                max_entries: env_parse(&key("CACHE_MAX_ENTRIES")).unwrap_or(base.max_entries),
            }
        });

        Self {
            kind,
            admission,
            write,
            batch,
            cache,
        }
    }

    pub fn with_per_entity_cap(mut self, cap: u32) -> Self {
        self.admission.per_entity_cap = cap;
        self
    }

    pub fn with_global_cap(mut self, cap: u32) -> Self {
        self.admission.global_cap = cap;
        self
    }

    pub fn with_sampling_rate(mut self, rate: f64) -> Self {
        self.admission.sampling_rate = rate;
        self
    }

    pub fn with_recency_ttl(mut self, ttl: Duration) -> Self {
        self.admission.recency_ttl = ttl;
        self
    }

    pub fn with_write(mut self, write: WritePolicy) -> Self {
        self.write = write;
        self
    }

    pub fn with_batch(mut self, batch: BatchPolicy) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_cache(mut self, cache: Option<CachePolicy>) -> Self {
        self.cache = cache;
        self
    }

    /// Validate this operation's settings.
    pub fn validate(&self) -> DamperResult<()> {
        let field = |name: &str| format!("{}.{}", self.kind, name);
        let invalid = |name: &str, value: String, reason: &str| {
            Err(DamperError::Config(ConfigError::InvalidValue {
                field: field(name),
                value,
                reason: reason.to_string(),
            }))
        };

        let admission = &self.admission;
        if admission.per_entity_cap == 0 {
            return invalid("per_entity_cap", "0".into(), "per_entity_cap must be positive");
        }
        if admission.global_cap < admission.per_entity_cap {
            return invalid(
                "global_cap",
                admission.global_cap.to_string(),
                "global_cap must be at least per_entity_cap",
            );
        }
        if admission.window.is_zero() {
            return invalid("window", "0s".into(), "window must be positive");
        }
        if !(0.0..=1.0).contains(&admission.sampling_rate) {
            return invalid(
                "sampling_rate",
                admission.sampling_rate.to_string(),
                "sampling_rate must be within [0.0, 1.0]",
            );
        }
        if admission.recency_ttl.is_zero() {
            return invalid("recency_ttl", "0s".into(), "recency_ttl must be positive");
        }

        if self.write.max_batch_size == 0 || self.write.max_batch_size > STORE_BATCH_LIMIT {
            return invalid(
                "max_batch_size",
                self.write.max_batch_size.to_string(),
                "max_batch_size must be between 1 and 500",
            );
        }
        if self.write.max_concurrency == 0 {
            return invalid("max_concurrency", "0".into(), "max_concurrency must be positive");
        }

        if self.batch.max_entities == 0 {
            return invalid("batch.max_entities", "0".into(), "max_entities must be positive");
        }
        if self.batch.concurrency == 0 {
            return invalid("batch.concurrency", "0".into(), "concurrency must be positive");
        }

        if let Some(cache) = &self.cache {
            if cache.freshness_window.is_zero() {
                return invalid(
                    "cache.freshness_window",
                    "0s".into(),
                    "freshness_window must be positive",
                );
            }
            if cache.hard_cap_window <= cache.freshness_window {
                return invalid(
                    "cache.hard_cap_window",
                    format!("{:?}", cache.hard_cap_window),
                    "hard_cap_window must be longer than freshness_window",
                );
            }
            if cache.max_entries == 0 {
                return invalid("cache.max_entries", "0".into(), "max_entries must be positive");
            }
        }

        Ok(())
    }
}

// ============================================================================
// GOVERNOR CONFIG
// ============================================================================

/// Configuration for all three governed operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorConfig {
    pub snapshot_fanout: OperationConfig,
    pub mirror_update: OperationConfig,
    pub status_check: OperationConfig,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            snapshot_fanout: OperationConfig::defaults_for(OperationKind::SnapshotFanout),
            mirror_update: OperationConfig::defaults_for(OperationKind::MirrorUpdate),
            status_check: OperationConfig::defaults_for(OperationKind::StatusCheck),
        }
    }
}

impl GovernorConfig {
    pub fn from_env() -> Self {
        Self {
            snapshot_fanout: OperationConfig::from_env(OperationKind::SnapshotFanout),
            mirror_update: OperationConfig::from_env(OperationKind::MirrorUpdate),
            status_check: OperationConfig::from_env(OperationKind::StatusCheck),
        }
    }

    pub fn for_kind(&self, kind: OperationKind) -> &OperationConfig {
        match kind {
            OperationKind::SnapshotFanout => &self.snapshot_fanout,
            OperationKind::MirrorUpdate => &self.mirror_update,
            OperationKind::StatusCheck => &self.status_check,
        }
    }

    pub fn validate(&self) -> DamperResult<()> {
        for kind in OperationKind::ALL {
            let op = self.for_kind(kind);
            if op.kind != kind {
                return Err(DamperError::Config(ConfigError::InvalidValue {
                    field: format!("{}.kind", kind),
                    value: op.kind.to_string(),
                    reason: "operation config registered under the wrong kind".to_string(),
                }));
            }
            op.validate()?;
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

// =============================================================================
// TESTS
// =============================================================================
