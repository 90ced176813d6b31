//! Async document store trait and in-memory implementation.
//!
//! The governor never owns business documents; it reads sources and
//! writes dependents through this trait. Every call is scoped by tenant.

use async_trait::async_trait;
use damper_core::{DamperResult, Document, Mutation, MutationKind, StorageError};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Document database used as source and sink of propagation.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // ========================================================================
    // SINGLE DOCUMENT OPERATIONS
    // ========================================================================

    /// Get a document by id.
    async fn get(&self, tenant_id: &str, collection: &str, id: &str)
        -> DamperResult<Option<Document>>;

    /// Create or replace a document.
    async fn set(&self, tenant_id: &str, collection: &str, doc: Document) -> DamperResult<()>;

    /// Merge fields into an existing document.
    ///
    /// Fails with `StorageError::NotFound` if the document does not exist.
    async fn update(
        &self,
        tenant_id: &str,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> DamperResult<()>;

    /// Delete a document. Returns whether it existed.
    async fn delete(&self, tenant_id: &str, collection: &str, id: &str) -> DamperResult<bool>;

    // ========================================================================
    // QUERIES AND BATCHES
    // ========================================================================

    /// All documents whose `field` equals `value`, ordered by id.
    async fn query_eq(
        &self,
        tenant_id: &str,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> DamperResult<Vec<Document>>;

    /// Apply the mutations as a single all-or-nothing write.
    async fn commit_batch(&self, tenant_id: &str, mutations: &[Mutation]) -> DamperResult<()>;
}

type CollectionKey = (String, String);
type Collection = BTreeMap<String, Map<String, Value>>;

/// In-memory document store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<CollectionKey, Collection>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub async fn count(&self, tenant_id: &str, collection: &str) -> usize {
        let collections = self.collections.read().await;
        collections
            .get(&(tenant_id.to_string(), collection.to_string()))
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

fn collection_key(tenant_id: &str, collection: &str) -> CollectionKey {
    (tenant_id.to_string(), collection.to_string())
}

/// Apply one mutation to the current state of its document.
fn apply_mutation(
    current: Option<Map<String, Value>>,
    mutation: &Mutation,
) -> Result<Option<Map<String, Value>>, StorageError> {
    let missing = || StorageError::NotFound {
        collection: mutation.collection.clone(),
        id: mutation.document_id.clone(),
    };

    match &mutation.kind {
        MutationKind::Set { fields } => Ok(Some(fields.clone())),
        MutationKind::Merge { fields } => {
            let mut doc = current.ok_or_else(missing)?;
            for (k, v) in fields {
                doc.insert(k.clone(), v.clone());
            }
            Ok(Some(doc))
        }
        MutationKind::RemoveFields { fields } => {
            let mut doc = current.ok_or_else(missing)?;
            for field in fields {
                doc.remove(field);
            }
            Ok(Some(doc))
        }
        MutationKind::Delete => Ok(None),
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(
        &self,
        tenant_id: &str,
        collection: &str,
        id: &str,
    ) -> DamperResult<Option<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection_key(tenant_id, collection))
            .and_then(|docs| docs.get(id))
            .map(|fields| Document::new(id, fields.clone())))
    }

    async fn set(&self, tenant_id: &str, collection: &str, doc: Document) -> DamperResult<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection_key(tenant_id, collection))
            .or_default()
            .insert(doc.id, doc.fields);
        Ok(())
    }

    async fn update(
        &self,
        tenant_id: &str,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> DamperResult<()> {
        let mut collections = self.collections.write().await;
        let doc = collections
            .get_mut(&collection_key(tenant_id, collection))
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StorageError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        doc.extend(fields);
        Ok(())
    }

    async fn delete(&self, tenant_id: &str, collection: &str, id: &str) -> DamperResult<bool> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(&collection_key(tenant_id, collection))
            .and_then(|docs| docs.remove(id))
            .is_some())
    }

    async fn query_eq(
        &self,
        tenant_id: &str,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> DamperResult<Vec<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection_key(tenant_id, collection))
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| fields.get(field) == Some(value))
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn commit_batch(&self, tenant_id: &str, mutations: &[Mutation]) -> DamperResult<()> {
        let mut collections = self.collections.write().await;

        // Stage every touched document so a failing mutation leaves no trace.
        let mut staged: HashMap<(String, String), Option<Map<String, Value>>> = HashMap::new();
        for mutation in mutations {
            let doc_key = (mutation.collection.clone(), mutation.document_id.clone());
            let current = match staged.get(&doc_key) {
                Some(staged_doc) => staged_doc.clone(),
                None => collections
                    .get(&collection_key(tenant_id, &mutation.collection))
                    .and_then(|docs| docs.get(&mutation.document_id))
                    .cloned(),
            };
            let next = apply_mutation(current, mutation)?;
            staged.insert(doc_key, next);
        }

        for ((collection, id), doc) in staged {
            let docs = collections
                .entry(collection_key(tenant_id, &collection))
                .or_default();
            match doc {
                Some(fields) => {
                    docs.insert(id, fields);
                }
                None => {
                    docs.remove(&id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use damper_core::DamperError;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() -> DamperResult<()> {
        let store = InMemoryDocumentStore::new();
        store
            .set("t1", "companies", Document::from_value("c1", json!({"name": "Acme"})))
            .await?;

        assert!(store.get("t1", "companies", "c1").await?.is_some());
        assert!(store.get("t2", "companies", "c1").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_missing_document_fails() {
        let store = InMemoryDocumentStore::new();
        let result = store
            .update("t1", "deals", "d1", fields(json!({"stage": "won"})))
            .await;
        assert!(matches!(
            result,
            Err(DamperError::Storage(StorageError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_query_eq_filters_by_field() -> DamperResult<()> {
        let store = InMemoryDocumentStore::new();
        for (id, company) in [("d1", "c1"), ("d2", "c2"), ("d3", "c1")] {
            store
                .set("t1", "deals", Document::from_value(id, json!({"companyId": company})))
                .await?;
        }

        let deals = store.query_eq("t1", "deals", "companyId", &json!("c1")).await?;
        let ids: Vec<_> = deals.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d3"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_batch_is_all_or_nothing() -> DamperResult<()> {
        let store = InMemoryDocumentStore::new();
        store
            .set("t1", "deals", Document::from_value("d1", json!({"title": "A"})))
            .await?;

        let mutations = vec![
            Mutation::merge("deals", "d1", fields(json!({"title": "B"}))),
            Mutation::merge("deals", "missing", fields(json!({"title": "C"}))),
        ];
        assert!(store.commit_batch("t1", &mutations).await.is_err());

        let d1 = store.get("t1", "deals", "d1").await?;
        assert_eq!(d1.and_then(|d| d.get_str("title").map(String::from)), Some("A".into()));
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_batch_sees_earlier_mutations() -> DamperResult<()> {
        let store = InMemoryDocumentStore::new();
        let mutations = vec![
            Mutation::set("mirrors", "m1", fields(json!({"a": 1, "b": 2}))),
            Mutation::remove_fields("mirrors", "m1", vec!["b".to_string()]),
            Mutation::delete("mirrors", "never-existed"),
        ];
        store.commit_batch("t1", &mutations).await?;

        let m1 = store.get("t1", "mirrors", "m1").await?;
        assert_eq!(m1.map(|d| d.fields), Some(fields(json!({"a": 1}))));
        assert_eq!(store.count("t1", "mirrors").await, 1);
        Ok(())
    }
}
