//! Recency guard: suppresses re-processing of an entity within a TTL.

use std::sync::Arc;
use std::time::Duration;

use damper_core::{Clock, DamperResult, EntityRef, OperationKind, RecencyKey, RecencyMarker};
use damper_storage::{RecencyClaim, RecencyStore};
use tracing::warn;

#[derive(Clone)]
pub struct RecencyGuard {
    store: Arc<dyn RecencyStore>,
    clock: Arc<dyn Clock>,
    scope: OperationKind,
    ttl: Duration,
    loop_alert_threshold: u32,
}

impl RecencyGuard {
    pub fn new(
        store: Arc<dyn RecencyStore>,
        clock: Arc<dyn Clock>,
        scope: OperationKind,
        ttl: Duration,
        loop_alert_threshold: u32,
    ) -> Self {
        Self {
            store,
            clock,
            scope,
            ttl,
            loop_alert_threshold,
        }
    }

    fn key(&self, entity: &EntityRef) -> RecencyKey {
        RecencyKey::new(self.scope, entity.clone())
    }

    pub async fn is_recently_processed(&self, entity: &EntityRef) -> DamperResult<bool> {
        let now = self.clock.now();
        Ok(self
            .store
            .get(&self.key(entity))
            .await?
            .is_some_and(|marker| marker.is_live(now)))
    }

    /// Count a suppressed attempt. Returns true if the entity is still inside
    /// its TTL.
    pub async fn observe(&self, entity: &EntityRef) -> DamperResult<bool> {
        match self.store.record_hit(&self.key(entity), self.clock.now()).await? {
            Some(marker) => {
                self.alert_if_looping(&marker);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Overwrite the marker with `last_seen_at = now`.
    pub async fn mark_processed(&self, entity: &EntityRef) -> DamperResult<()> {
        let marker = RecencyMarker::new(self.key(entity), self.clock.now(), self.ttl);
        self.store.put(marker).await
    }

    /// Atomically take the marker unless a live one exists.
    pub async fn claim(&self, entity: &EntityRef) -> DamperResult<RecencyClaim> {
        let claim = self
            .store
            .claim(&self.key(entity), self.clock.now(), self.ttl)
            .await?;
        if let RecencyClaim::Suppressed(marker) = &claim {
            self.alert_if_looping(marker);
        }
        Ok(claim)
    }

    fn alert_if_looping(&self, marker: &RecencyMarker) {
        if marker.hit_count_in_burst >= self.loop_alert_threshold {
            warn!(
                operation = %self.scope,
                entity = %marker.key.entity,
                hits = marker.hit_count_in_burst,
                ttl_secs = self.ttl.as_secs(),
                "Repeated invocations suppressed within recency window; possible update loop"
            );
        }
    }
}
