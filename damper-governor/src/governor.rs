//! The governor: the three governed operations wired to one document store.

use std::sync::Arc;

use damper_core::{
    BatchOutcome, Clock, CounterKey, DamperResult, EntityRef, GovernedOutcome, GovernorConfig,
    OperationKind,
};
use damper_storage::{
    BoundedBatchWriter, CollectionFetcher, CounterStore, DocumentStore, RecencyStore,
};
use tracing::info;

use crate::operation::{AdmissionDeps, GovernedOperation, OutcomeCache};
use crate::projector::{LocationProjector, SnapshotProjector, StatusProjector};
use crate::target::{FanoutTarget, MirrorTarget};

/// Collection and field names the built-in operations read and write.
pub mod collections {
    pub const COMPANIES: &str = "companies";
    pub const DEALS: &str = "deals";
    pub const DEAL_COMPANY_KEY: &str = "companyId";
    pub const DEAL_SNAPSHOT_FIELD: &str = "companySnapshot";
    pub const LOCATIONS: &str = "locations";
    pub const LOCATION_MIRRORS: &str = "location_mirrors";
    pub const USERS: &str = "users";
    pub const USER_STATUS: &str = "user_status";
}

pub struct Governor {
    snapshot_fanout: GovernedOperation,
    mirror_update: GovernedOperation,
    status_check: GovernedOperation,
    counters: Arc<dyn CounterStore>,
    recency: Arc<dyn RecencyStore>,
    clock: Arc<dyn Clock>,
}

impl Governor {
    /// Build the standard operations over `documents`.
    pub fn new(
        config: GovernorConfig,
        documents: Arc<dyn DocumentStore>,
        deps: AdmissionDeps,
    ) -> DamperResult<Self> {
        config.validate()?;

        let snapshot_fanout = {
            let op = config.snapshot_fanout.clone();
            let writer = BoundedBatchWriter::new(Arc::clone(&documents), op.write.clone());
            GovernedOperation::new(
                op,
                deps.clone(),
                Arc::new(CollectionFetcher::new(
                    Arc::clone(&documents),
                    collections::COMPANIES,
                )),
                Arc::new(SnapshotProjector),
                Arc::new(FanoutTarget::new(
                    Arc::clone(&documents),
                    writer,
                    collections::DEALS,
                    collections::DEAL_COMPANY_KEY,
                    collections::DEAL_SNAPSHOT_FIELD,
                )),
            )
        };

        let mirror_update = GovernedOperation::new(
            config.mirror_update.clone(),
            deps.clone(),
            Arc::new(CollectionFetcher::new(
                Arc::clone(&documents),
                collections::LOCATIONS,
            )),
            Arc::new(LocationProjector),
            Arc::new(MirrorTarget::new(
                Arc::clone(&documents),
                collections::LOCATION_MIRRORS,
                OperationKind::MirrorUpdate.as_str(),
            )),
        );

        let status_check = GovernedOperation::new(
            config.status_check.clone(),
            deps.clone(),
            Arc::new(CollectionFetcher::new(
                Arc::clone(&documents),
                collections::USERS,
            )),
            Arc::new(StatusProjector),
            Arc::new(MirrorTarget::new(
                Arc::clone(&documents),
                collections::USER_STATUS,
                OperationKind::StatusCheck.as_str(),
            )),
        );

        info!(
            fanout_sampling = config.snapshot_fanout.admission.sampling_rate,
            mirror_per_entity_cap = config.mirror_update.admission.per_entity_cap,
            status_cache = config.status_check.cache.is_some(),
            "Governor initialized"
        );

        Ok(Self::from_operations(
            snapshot_fanout,
            mirror_update,
            status_check,
            deps,
        ))
    }

    /// Assemble a governor from custom-built operations.
    pub fn from_operations(
        snapshot_fanout: GovernedOperation,
        mirror_update: GovernedOperation,
        status_check: GovernedOperation,
        deps: AdmissionDeps,
    ) -> Self {
        Self {
            snapshot_fanout,
            mirror_update,
            status_check,
            counters: deps.counters,
            recency: deps.recency,
            clock: deps.clock,
        }
    }

    pub fn operation(&self, kind: OperationKind) -> &GovernedOperation {
        match kind {
            OperationKind::SnapshotFanout => &self.snapshot_fanout,
            OperationKind::MirrorUpdate => &self.mirror_update,
            OperationKind::StatusCheck => &self.status_check,
        }
    }

    pub async fn invoke(
        &self,
        kind: OperationKind,
        entity: &EntityRef,
        force: bool,
    ) -> DamperResult<GovernedOutcome> {
        self.operation(kind).invoke(entity, force).await
    }

    pub async fn invoke_batch(
        &self,
        kind: OperationKind,
        tenant_id: &str,
        entity_ids: &[String],
        force: bool,
    ) -> DamperResult<BatchOutcome> {
        self.operation(kind)
            .invoke_batch(tenant_id, entity_ids, force)
            .await
    }

    /// Every operation cache, for background sweeping.
    pub fn caches(&self) -> Vec<(OperationKind, Arc<OutcomeCache>)> {
        OperationKind::ALL
            .iter()
            .filter_map(|kind| {
                self.operation(*kind)
                    .cache()
                    .map(|cache| (*kind, Arc::clone(cache)))
            })
            .collect()
    }

    /// Delete recency markers whose TTL has elapsed.
    pub async fn prune_recency(&self) -> DamperResult<u64> {
        self.recency.prune_expired(self.clock.now()).await
    }

    /// Delete counter records of windows that have already closed.
    pub async fn prune_counters(&self) -> DamperResult<u64> {
        let now = self.clock.now();
        let mut pruned = 0;
        for kind in OperationKind::ALL {
            let window = self.operation(kind).config().admission.window;
            let current = CounterKey::window_id_at(now, window);
            pruned += self.counters.prune_before(kind, current).await?;
        }
        Ok(pruned)
    }
}
