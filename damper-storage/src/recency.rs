//! TTL-scoped recency markers used to suppress cascading re-processing.

use async_trait::async_trait;
use damper_core::{DamperResult, RecencyKey, RecencyMarker, Timestamp};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Result of an atomic claim on a recency marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecencyClaim {
    /// No live marker existed; a fresh one has been written.
    Claimed(RecencyMarker),
    /// A live marker exists. Its burst hit count has been incremented.
    Suppressed(RecencyMarker),
}

impl RecencyClaim {
    pub fn is_claimed(&self) -> bool {
        matches!(self, RecencyClaim::Claimed(_))
    }

    pub fn marker(&self) -> &RecencyMarker {
        match self {
            RecencyClaim::Claimed(marker) | RecencyClaim::Suppressed(marker) => marker,
        }
    }
}

/// Durable recency marker storage shared by every governor instance.
#[async_trait]
pub trait RecencyStore: Send + Sync {
    /// Read the marker for a key, live or not.
    async fn get(&self, key: &RecencyKey) -> DamperResult<Option<RecencyMarker>>;

    /// Overwrite the marker for its key.
    async fn put(&self, marker: RecencyMarker) -> DamperResult<()>;

    /// Count a suppressed hit against a live marker.
    ///
    /// Returns the updated marker, or `None` (writing nothing) when no live
    /// marker exists.
    async fn record_hit(&self, key: &RecencyKey, now: Timestamp)
        -> DamperResult<Option<RecencyMarker>>;

    /// Compare-and-set: write a fresh marker unless a live one exists.
    async fn claim(
        &self,
        key: &RecencyKey,
        now: Timestamp,
        ttl: Duration,
    ) -> DamperResult<RecencyClaim>;

    /// Delete markers whose TTL has elapsed. Returns how many were removed.
    async fn prune_expired(&self, now: Timestamp) -> DamperResult<u64>;
}

/// Process-local recency store.
#[derive(Debug, Default)]
pub struct InMemoryRecencyStore {
    markers: Mutex<HashMap<RecencyKey, RecencyMarker>>,
}

impl InMemoryRecencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.markers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.markers.lock().await.is_empty()
    }
}

#[async_trait]
impl RecencyStore for InMemoryRecencyStore {
    async fn get(&self, key: &RecencyKey) -> DamperResult<Option<RecencyMarker>> {
        Ok(self.markers.lock().await.get(key).cloned())
    }

    async fn put(&self, marker: RecencyMarker) -> DamperResult<()> {
        self.markers.lock().await.insert(marker.key.clone(), marker);
        Ok(())
    }

    async fn record_hit(
        &self,
        key: &RecencyKey,
        now: Timestamp,
    ) -> DamperResult<Option<RecencyMarker>> {
        let mut markers = self.markers.lock().await;
        Ok(markers
            .get_mut(key)
            .filter(|marker| marker.is_live(now))
            .map(|marker| {
                marker.hit_count_in_burst = marker.hit_count_in_burst.saturating_add(1);
                marker.clone()
            }))
    }

    async fn claim(
        &self,
        key: &RecencyKey,
        now: Timestamp,
        ttl: Duration,
    ) -> DamperResult<RecencyClaim> {
        let mut markers = self.markers.lock().await;
        if let Some(existing) = markers.get_mut(key) {
            if existing.is_live(now) {
                existing.hit_count_in_burst = existing.hit_count_in_burst.saturating_add(1);
                return Ok(RecencyClaim::Suppressed(existing.clone()));
            }
        }
        let marker = RecencyMarker::new(key.clone(), now, ttl);
        markers.insert(key.clone(), marker.clone());
        Ok(RecencyClaim::Claimed(marker))
    }

    async fn prune_expired(&self, now: Timestamp) -> DamperResult<u64> {
        let mut markers = self.markers.lock().await;
        let before = markers.len();
        markers.retain(|_, marker| marker.is_live(now));
        Ok((before - markers.len()) as u64)
    }
}
