//! Fixed-window rate limit counters.
//!
//! Counters are keyed by (scope, subject, window). A new window simply
//! starts a new record; old records are never rewritten, only pruned once
//! their window has closed.

use async_trait::async_trait;
use damper_core::{CounterKey, CounterRecord, DamperResult, OperationKind, Timestamp};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// A counter together with the ceiling it must stay under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterLimit {
    pub key: CounterKey,
    pub max: u32,
}

impl CounterLimit {
    pub fn new(key: CounterKey, max: u32) -> Self {
        Self { key, max }
    }
}

/// Result of an atomic increment-and-compare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// Every counter was below its ceiling and has been incremented.
    /// Counts are the post-increment values, in request order.
    Acquired { counts: Vec<u32> },
    /// The first counter found at or above its ceiling. Nothing was written.
    Exhausted { key: CounterKey, count: u32 },
}

impl Acquisition {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Acquisition::Acquired { .. })
    }
}

/// Durable counter storage shared by every governor instance.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read a counter record, `None` if the window has no admissions yet.
    async fn get(&self, key: &CounterKey) -> DamperResult<Option<CounterRecord>>;

    /// Unconditionally increment a counter. Returns the new count.
    async fn increment(&self, key: &CounterKey, now: Timestamp) -> DamperResult<u32>;

    /// Increment every counter iff all of them are below their ceilings.
    ///
    /// Either all counters are incremented or none is, so concurrent
    /// callers can never push a counter past its ceiling.
    async fn try_acquire(
        &self,
        limits: &[CounterLimit],
        now: Timestamp,
    ) -> DamperResult<Acquisition>;

    /// Delete every `scope` record whose window is older than `window_id`.
    /// Returns the number of records removed.
    async fn prune_before(&self, scope: OperationKind, window_id: i64) -> DamperResult<u64>;
}

/// Process-local counter store.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    records: Mutex<HashMap<CounterKey, CounterRecord>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across all windows.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

fn bump(records: &mut HashMap<CounterKey, CounterRecord>, key: &CounterKey, now: Timestamp) -> u32 {
    let record = records
        .entry(key.clone())
        .or_insert_with(|| CounterRecord::empty(key.clone(), now));
    record.count = record.count.saturating_add(1);
    record.updated_at = now;
    record.count
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, key: &CounterKey) -> DamperResult<Option<CounterRecord>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn increment(&self, key: &CounterKey, now: Timestamp) -> DamperResult<u32> {
        let mut records = self.records.lock().await;
        Ok(bump(&mut records, key, now))
    }

    async fn try_acquire(
        &self,
        limits: &[CounterLimit],
        now: Timestamp,
    ) -> DamperResult<Acquisition> {
        let mut records = self.records.lock().await;

        for limit in limits {
            let count = records.get(&limit.key).map(|r| r.count).unwrap_or(0);
            if count >= limit.max {
                return Ok(Acquisition::Exhausted {
                    key: limit.key.clone(),
                    count,
                });
            }
        }

        let counts = limits
            .iter()
            .map(|limit| bump(&mut records, &limit.key, now))
            .collect();
        Ok(Acquisition::Acquired { counts })
    }

    async fn prune_before(&self, scope: OperationKind, window_id: i64) -> DamperResult<u64> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|key, _| key.scope != scope || key.window_id >= window_id);
        Ok((before - records.len()) as u64)
    }
}
