//! In-process freshness cache with LRU trimming.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use damper_core::{CachePolicy, Clock, Timestamp, CACHE_TRIM_FRACTION};
use dashmap::DashMap;

use super::freshness::{classify, CacheLookup, Freshness};

/// A cached value and its access bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub value: V,
    pub written_at: Timestamp,
    pub last_access_at: Timestamp,
    pub access_count: u64,
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Number of cache hits (fresh or hard-capped).
    pub hits: u64,
    /// Number of misses, expired entries included.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of entries removed by sweeps and trims.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries older than the freshness window.
    pub expired: usize,
    /// Entries evicted because the cache was over capacity.
    pub trimmed: usize,
    pub remaining: usize,
}

/// Best-effort, per-process cache of recent results.
///
/// Not shared across instances. Losing it only costs an extra upstream
/// fetch, so no operation depends on its contents for correctness.
pub struct FreshnessCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> FreshnessCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(policy: CachePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            policy,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Look up a key, classifying the entry by age.
    ///
    /// Hits refresh the entry's LRU position. Entries past the hard cap are
    /// dropped on sight.
    pub fn lookup(&self, key: &K) -> CacheLookup<V> {
        let now = self.clock.now();

        let result = match self.entries.get_mut(key) {
            None => CacheLookup::Miss,
            Some(mut entry) => {
                let (freshness, age) = classify(&self.policy, entry.written_at, now);
                match freshness {
                    Freshness::Expired => CacheLookup::Expired { age },
                    Freshness::Fresh | Freshness::HardCapped => {
                        entry.last_access_at = now;
                        entry.access_count += 1;
                        let value = entry.value.clone();
                        if freshness == Freshness::Fresh {
                            CacheLookup::Fresh { value, age }
                        } else {
                            CacheLookup::HardCapped { value, age }
                        }
                    }
                }
            }
        };

        if let CacheLookup::Expired { .. } = result {
            if self.entries.remove(key).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        if result.is_hit() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Usable value and its staleness flag.
    pub fn get(&self, key: &K) -> Option<(V, bool)> {
        self.lookup(key).into_value()
    }

    /// Insert or replace an entry, trimming if the cache grows past capacity.
    pub fn put(&self, key: K, value: V) {
        let now = self.clock.now();
        self.entries.insert(
            key,
            CacheEntry {
                value,
                written_at: now,
                last_access_at: now,
                access_count: 0,
            },
        );
        if self.entries.len() > self.policy.max_entries {
            self.trim();
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries older than the freshness window, then trim to capacity.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            classify(&self.policy, entry.written_at, now).0 == Freshness::Fresh
        });
        let expired = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(expired as u64, Ordering::Relaxed);

        let trimmed = if self.entries.len() > self.policy.max_entries {
            self.trim()
        } else {
            0
        };

        SweepReport {
            expired,
            trimmed,
            remaining: self.entries.len(),
        }
    }

    /// Evict the least recently accessed share of entries.
    fn trim(&self) -> usize {
        let target = (self.entries.len() as f64 * CACHE_TRIM_FRACTION).ceil() as usize;
        if target == 0 {
            return 0;
        }

        let mut by_access: Vec<(K, Timestamp)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_access_at))
            .collect();
        by_access.sort_by_key(|(_, last_access_at)| *last_access_at);

        let mut removed = 0;
        for (key, _) in by_access.into_iter().take(target) {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        tracing::debug!(removed, remaining = self.entries.len(), "Cache trimmed");
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
