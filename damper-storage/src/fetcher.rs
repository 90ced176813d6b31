//! Source entity lookup for governed operations.

use std::sync::Arc;

use async_trait::async_trait;
use damper_core::{DamperResult, Document, EntityRef};

use crate::document::DocumentStore;

/// Reads the current state of the entity a governed operation acts on.
///
/// `Ok(None)` means the entity does not exist upstream.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Name used in logs and upstream errors.
    fn source_name(&self) -> &str;

    async fn fetch(&self, entity: &EntityRef) -> DamperResult<Option<Document>>;
}

/// Fetches sources from one collection of a `DocumentStore`.
#[derive(Clone)]
pub struct CollectionFetcher {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl CollectionFetcher {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }
}

#[async_trait]
impl SourceFetcher for CollectionFetcher {
    fn source_name(&self) -> &str {
        &self.collection
    }

    async fn fetch(&self, entity: &EntityRef) -> DamperResult<Option<Document>> {
        self.store
            .get(&entity.tenant_id, &self.collection, &entity.entity_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InMemoryDocumentStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_fetch_reads_from_tenant_collection() -> DamperResult<()> {
        let store = Arc::new(InMemoryDocumentStore::new());
        store
            .set("t1", "locations", Document::from_value("loc-1", json!({"state": "Ohio"})))
            .await?;

        let fetcher = CollectionFetcher::new(store, "locations");
        assert_eq!(fetcher.source_name(), "locations");
        assert!(fetcher.fetch(&EntityRef::new("t1", "loc-1")).await?.is_some());
        assert!(fetcher.fetch(&EntityRef::new("t2", "loc-1")).await?.is_none());
        Ok(())
    }
}
