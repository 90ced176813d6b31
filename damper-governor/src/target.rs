//! Persistence targets: where a projection is written.

use std::sync::Arc;

use async_trait::async_trait;
use damper_core::{
    DamperResult, Document, EntityRef, MirrorDocument, Mutation, OperationSummary, Projection,
    StorageError, Timestamp,
};
use damper_storage::{BoundedBatchWriter, DocumentStore};
use serde_json::{Map, Value};
use tracing::debug;

/// Applies a projection to the dependent aggregate(s) of an entity.
#[async_trait]
pub trait PersistenceTarget: Send + Sync {
    async fn persist(
        &self,
        entity: &EntityRef,
        projection: &Projection,
        now: Timestamp,
    ) -> DamperResult<OperationSummary>;
}

// ============================================================================
// MIRROR
// ============================================================================

/// One mirror document per source, keyed by the source id.
///
/// `Derived` upserts the mirror; `Invalid` deletes it.
#[derive(Clone)]
pub struct MirrorTarget {
    store: Arc<dyn DocumentStore>,
    collection: String,
    processed_by: String,
}

impl MirrorTarget {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        processed_by: impl Into<String>,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            processed_by: processed_by.into(),
        }
    }
}

#[async_trait]
impl PersistenceTarget for MirrorTarget {
    async fn persist(
        &self,
        entity: &EntityRef,
        projection: &Projection,
        now: Timestamp,
    ) -> DamperResult<OperationSummary> {
        match projection {
            Projection::Derived { fields } => {
                let mirror = MirrorDocument {
                    source_id: entity.entity_id.clone(),
                    derived_fields: fields.clone(),
                    processed_by: self.processed_by.clone(),
                    processed_at: now,
                };
                self.store
                    .set(
                        &entity.tenant_id,
                        &self.collection,
                        Document::new(entity.entity_id.clone(), mirror.into_fields()),
                    )
                    .await?;
                Ok(OperationSummary {
                    updated_count: 1,
                    data: Some(Value::Object(fields.clone())),
                    ..Default::default()
                })
            }
            Projection::Invalid { reason } => {
                let existed = self
                    .store
                    .delete(&entity.tenant_id, &self.collection, &entity.entity_id)
                    .await?;
                debug!(
                    entity = %entity,
                    collection = %self.collection,
                    existed,
                    reason = %reason,
                    "Mirror invalidated"
                );
                Ok(OperationSummary {
                    deleted_count: usize::from(existed),
                    ..Default::default()
                })
            }
        }
    }
}

// ============================================================================
// FANOUT
// ============================================================================

/// Denormalizes the projection onto every dependent document that
/// references the source through `foreign_key`.
#[derive(Clone)]
pub struct FanoutTarget {
    store: Arc<dyn DocumentStore>,
    writer: BoundedBatchWriter,
    dependent_collection: String,
    foreign_key: String,
    snapshot_field: String,
}

impl FanoutTarget {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        writer: BoundedBatchWriter,
        dependent_collection: impl Into<String>,
        foreign_key: impl Into<String>,
        snapshot_field: impl Into<String>,
    ) -> Self {
        Self {
            store,
            writer,
            dependent_collection: dependent_collection.into(),
            foreign_key: foreign_key.into(),
            snapshot_field: snapshot_field.into(),
        }
    }
}

#[async_trait]
impl PersistenceTarget for FanoutTarget {
    async fn persist(
        &self,
        entity: &EntityRef,
        projection: &Projection,
        _now: Timestamp,
    ) -> DamperResult<OperationSummary> {
        let dependents = self
            .store
            .query_eq(
                &entity.tenant_id,
                &self.dependent_collection,
                &self.foreign_key,
                &Value::String(entity.entity_id.clone()),
            )
            .await?;

        let mutations: Vec<Mutation> = match projection {
            Projection::Derived { fields } => dependents
                .iter()
                .map(|doc| {
                    let mut update = Map::new();
                    update.insert(self.snapshot_field.clone(), Value::Object(fields.clone()));
                    Mutation::merge(&self.dependent_collection, &doc.id, update)
                })
                .collect(),
            // Stale snapshots are stripped from dependents that carry one.
            Projection::Invalid { .. } => dependents
                .iter()
                .filter(|doc| doc.get(&self.snapshot_field).is_some())
                .map(|doc| {
                    Mutation::remove_fields(
                        &self.dependent_collection,
                        &doc.id,
                        vec![self.snapshot_field.clone()],
                    )
                })
                .collect(),
        };

        let report = self.writer.apply_all(&entity.tenant_id, mutations).await;
        if report.mutations_applied == 0 && !report.is_complete() {
            let first = report
                .failures
                .first()
                .map(|failure| failure.error.to_string())
                .unwrap_or_default();
            return Err(StorageError::TransactionFailed {
                reason: format!(
                    "every fanout chunk failed ({} of {}): {}",
                    report.failures.len(),
                    report.chunks_total,
                    first
                ),
            }
            .into());
        }
        let mut summary = OperationSummary {
            failed_count: report.mutations_failed(),
            ..Default::default()
        };
        match projection {
            Projection::Derived { fields } => {
                summary.updated_count = report.mutations_applied;
                summary.data = Some(Value::Object(fields.clone()));
            }
            Projection::Invalid { .. } => summary.deleted_count = report.mutations_applied,
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use damper_core::WritePolicy;
    use damper_storage::InMemoryDocumentStore;
    use serde_json::json;
    use std::time::Duration;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn test_mirror_upsert_then_delete() -> DamperResult<()> {
        let store = Arc::new(InMemoryDocumentStore::new());
        let target = MirrorTarget::new(store.clone(), "location_mirrors", "mirror-update");
        let loc = EntityRef::new("t1", "loc-1");

        let derived = Projection::derived(fields(json!({"stateCode": "CA"})));
        let summary = target.persist(&loc, &derived, Utc::now()).await?;
        assert_eq!(summary.updated_count, 1);

        let stored = store.get("t1", "location_mirrors", "loc-1").await?;
        let mirror = stored.as_ref().and_then(MirrorDocument::from_document);
        assert_eq!(
            mirror.map(|m| m.derived_fields),
            Some(fields(json!({"stateCode": "CA"})))
        );

        let summary = target
            .persist(&loc, &Projection::invalid("unresolved"), Utc::now())
            .await?;
        assert_eq!(summary.deleted_count, 1);
        assert!(store.get("t1", "location_mirrors", "loc-1").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_fanout_touches_only_dependents() -> DamperResult<()> {
        let store = Arc::new(InMemoryDocumentStore::new());
        for (id, company) in [("d1", "c1"), ("d2", "c1"), ("d3", "c2")] {
            store
                .set("t1", "deals", Document::from_value(id, json!({"companyId": company})))
                .await?;
        }
        let writer = BoundedBatchWriter::new(
            store.clone(),
            WritePolicy {
                inter_batch_delay: Duration::ZERO,
                ..WritePolicy::default()
            },
        );
        let target = FanoutTarget::new(store.clone(), writer, "deals", "companyId", "companySnapshot");
        let c1 = EntityRef::new("t1", "c1");

        let derived = Projection::derived(fields(json!({"name": "Acme"})));
        let summary = target.persist(&c1, &derived, Utc::now()).await?;
        assert_eq!(summary.updated_count, 2);

        let d1 = store.get("t1", "deals", "d1").await?;
        assert_eq!(
            d1.and_then(|d| d.get("companySnapshot").cloned()),
            Some(json!({"name": "Acme"}))
        );
        let d3 = store.get("t1", "deals", "d3").await?;
        assert!(d3.and_then(|d| d.get("companySnapshot").cloned()).is_none());

        let summary = target
            .persist(&c1, &Projection::invalid("no name"), Utc::now())
            .await?;
        assert_eq!(summary.deleted_count, 2);
        Ok(())
    }
}
