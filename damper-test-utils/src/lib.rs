//! DAMPER Test Utilities
//!
//! Shared test infrastructure for the damper workspace:
//! - Instrumented fakes for the document store and source fetcher
//! - Proptest generators for identities, documents and policies
//! - Fixtures for the standard propagation scenarios
//! - Assertions on governed outcomes

pub use damper_core::{
    CachedPayload, Clock, DamperError, DamperResult, Document, EntityRef, GovernedOutcome,
    LimitScope, ManualClock, Mutation, OperationKind, StorageError, Timestamp, UpstreamError,
};

use async_trait::async_trait;
use damper_storage::{DocumentStore, InMemoryDocumentStore, SourceFetcher};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// INSTRUMENTED FAKES
// ============================================================================

/// Document store that records how batch commits are issued.
///
/// Tracks the number of concurrently open batch commits and the largest
/// batch seen, and can be told to fail any batch that touches a given
/// document id.
#[derive(Debug, Default)]
pub struct InstrumentedDocumentStore {
    inner: InMemoryDocumentStore,
    commit_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    max_batch_size: AtomicUsize,
    batch_count: AtomicUsize,
    failing_ids: Mutex<HashSet<String>>,
}

impl InstrumentedDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every batch commit open for `delay` so overlap is observable.
    pub fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = delay;
        self
    }

    /// Fail every batch containing a mutation for `document_id`.
    pub fn fail_batches_touching(&self, document_id: impl Into<String>) {
        self.failing_ids
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .insert(document_id.into());
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size.load(Ordering::SeqCst)
    }

    pub fn batch_count(&self) -> usize {
        self.batch_count.load(Ordering::SeqCst)
    }

    pub async fn count(&self, tenant_id: &str, collection: &str) -> usize {
        self.inner.count(tenant_id, collection).await
    }

    fn failing_mutation<'a>(&self, mutations: &'a [Mutation]) -> Option<&'a Mutation> {
        let failing = self.failing_ids.lock().unwrap_or_else(|err| err.into_inner());
        mutations.iter().find(|m| failing.contains(&m.document_id))
    }
}

#[async_trait]
impl DocumentStore for InstrumentedDocumentStore {
    async fn get(
        &self,
        tenant_id: &str,
        collection: &str,
        id: &str,
    ) -> DamperResult<Option<Document>> {
        self.inner.get(tenant_id, collection, id).await
    }

    async fn set(&self, tenant_id: &str, collection: &str, doc: Document) -> DamperResult<()> {
        self.inner.set(tenant_id, collection, doc).await
    }

    async fn update(
        &self,
        tenant_id: &str,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> DamperResult<()> {
        self.inner.update(tenant_id, collection, id, fields).await
    }

    async fn delete(&self, tenant_id: &str, collection: &str, id: &str) -> DamperResult<bool> {
        self.inner.delete(tenant_id, collection, id).await
    }

    async fn query_eq(
        &self,
        tenant_id: &str,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> DamperResult<Vec<Document>> {
        self.inner.query_eq(tenant_id, collection, field, value).await
    }

    async fn commit_batch(&self, tenant_id: &str, mutations: &[Mutation]) -> DamperResult<()> {
        let open = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(open, Ordering::SeqCst);
        self.max_batch_size
            .fetch_max(mutations.len(), Ordering::SeqCst);
        self.batch_count.fetch_add(1, Ordering::SeqCst);

        if !self.commit_delay.is_zero() {
            tokio::time::sleep(self.commit_delay).await;
        }

        let result = match self.failing_mutation(mutations) {
            Some(m) => Err(StorageError::WriteFailed {
                collection: m.collection.clone(),
                id: m.document_id.clone(),
                reason: "injected failure".to_string(),
            }
            .into()),
            None => self.inner.commit_batch(tenant_id, mutations).await,
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Source fetcher over a fixed set of documents that counts its calls.
#[derive(Debug)]
pub struct CountingFetcher {
    name: String,
    documents: Mutex<HashMap<EntityRef, Document>>,
    failure: Mutex<Option<String>>,
    fetches: AtomicUsize,
}

impl CountingFetcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_document(self, entity: EntityRef, fields: Value) -> Self {
        self.insert(entity, fields);
        self
    }

    pub fn insert(&self, entity: EntityRef, fields: Value) {
        let doc = Document::from_value(entity.entity_id.clone(), fields);
        self.documents
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .insert(entity, doc);
    }

    pub fn remove(&self, entity: &EntityRef) {
        self.documents
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .remove(entity);
    }

    /// Make every subsequent fetch fail with `reason` (`None` to recover).
    pub fn set_failure(&self, reason: Option<&str>) {
        *self.failure.lock().unwrap_or_else(|err| err.into_inner()) = reason.map(String::from);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for CountingFetcher {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, entity: &EntityRef) -> DamperResult<Option<Document>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone();
        if let Some(reason) = failure {
            return Err(UpstreamError::FetchFailed {
                source_name: self.name.clone(),
                reason,
            }
            .into());
        }
        Ok(self
            .documents
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .get(entity)
            .cloned())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for damper types.

    use super::*;
    use damper_core::{CounterKey, CounterSubject, WritePolicy};
    use proptest::prelude::*;

    pub fn arb_operation_kind() -> impl Strategy<Value = OperationKind> {
        prop_oneof![
            Just(OperationKind::SnapshotFanout),
            Just(OperationKind::MirrorUpdate),
            Just(OperationKind::StatusCheck),
        ]
    }

    /// Entity in one of a few tenants, so collisions actually happen.
    pub fn arb_entity_ref() -> impl Strategy<Value = EntityRef> {
        ("t[0-2]", "[a-z]{1,3}-[0-9]{1,2}").prop_map(|(t, e)| EntityRef::new(t, e))
    }

    pub fn arb_counter_key() -> impl Strategy<Value = CounterKey> {
        (
            arb_operation_kind(),
            prop::option::of(arb_entity_ref()),
            0i64..1_000_000,
        )
            .prop_map(|(scope, entity, window_id)| {
                let subject = entity.map_or(CounterSubject::Global, CounterSubject::Entity);
                CounterKey::new(scope, subject, window_id)
            })
    }

    /// Free-text state values: canonical names, codes, noise and blanks.
    pub fn arb_state_text() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("California".to_string()),
            Just("west virginia".to_string()),
            Just("TX".to_string()),
            Just("N.Y.".to_string()),
            "[A-Za-z ]{0,20}",
        ]
    }

    pub fn arb_location_document() -> impl Strategy<Value = Value> {
        (
            prop::option::of(arb_state_text()),
            prop::option::of("[A-Za-z ]{1,12}"),
        )
            .prop_map(|(state, city)| {
                let mut fields = Map::new();
                if let Some(state) = state {
                    fields.insert("state".to_string(), Value::String(state));
                }
                if let Some(city) = city {
                    fields.insert("city".to_string(), Value::String(city));
                }
                Value::Object(fields)
            })
    }

    pub fn arb_write_policy() -> impl Strategy<Value = WritePolicy> {
        (1usize..20, 1usize..5).prop_map(|(max_batch_size, max_concurrency)| WritePolicy {
            max_batch_size,
            max_concurrency,
            inter_batch_delay: Duration::ZERO,
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built documents and configs for the standard scenarios.

    use super::*;
    use chrono::{TimeZone, Utc};
    use damper_core::{BatchPolicy, GovernorConfig, OperationConfig, WritePolicy};
    use serde_json::json;

    pub const TENANT: &str = "tenant-1";

    /// Top of an hour, so tests never straddle a window boundary by accident.
    pub fn window_start() -> Timestamp {
        Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn manual_clock() -> ManualClock {
        ManualClock::new(window_start())
    }

    pub fn entity(id: &str) -> EntityRef {
        EntityRef::new(TENANT, id)
    }

    pub fn company(name: &str) -> Value {
        json!({
            "name": name,
            "industry": "Staffing",
            "website": "https://example.com",
            "city": "Austin",
            "state": "TX",
            "annualRevenue": 1_000_000
        })
    }

    pub fn deal(company_id: &str) -> Value {
        json!({"title": "Placement", "companyId": company_id, "stage": "open"})
    }

    pub fn location(state: &str) -> Value {
        json!({"name": "Office", "state": state, "city": "Somewhere"})
    }

    pub fn user_status() -> Value {
        json!({
            "email": "recruiter@example.com",
            "emailConnected": true,
            "calendarConnected": true,
            "syncState": "idle",
            "grantStatus": "valid"
        })
    }

    /// Every operation with sampling disabled and no write pacing.
    pub fn deterministic_config() -> GovernorConfig {
        let tune = |config: OperationConfig| {
            let batch = BatchPolicy {
                inter_batch_delay: Duration::ZERO,
                ..config.batch.clone()
            };
            config
                .with_sampling_rate(1.0)
                .with_write(WritePolicy {
                    inter_batch_delay: Duration::ZERO,
                    ..WritePolicy::default()
                })
                .with_batch(batch)
        };
        let config = GovernorConfig::default();
        GovernorConfig {
            snapshot_fanout: tune(config.snapshot_fanout),
            mirror_update: tune(config.mirror_update),
            status_check: tune(config.status_check),
        }
    }

    /// Write documents into a collection of the fixture tenant.
    pub async fn seed<S: DocumentStore + ?Sized>(
        store: &S,
        collection: &str,
        docs: impl IntoIterator<Item = (String, Value)>,
    ) -> DamperResult<()> {
        for (id, fields) in docs {
            store
                .set(TENANT, collection, Document::from_value(id, fields))
                .await?;
        }
        Ok(())
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on governed outcomes.

    use super::*;

    #[track_caller]
    pub fn assert_succeeded(outcome: &GovernedOutcome) {
        assert!(
            matches!(outcome, GovernedOutcome::Succeeded(_)),
            "Expected Succeeded, got: {:?}",
            outcome
        );
    }

    #[track_caller]
    pub fn assert_rate_limited(outcome: &GovernedOutcome, scope: LimitScope) {
        match outcome {
            GovernedOutcome::RateLimited { scope: got } => {
                assert_eq!(*got, scope, "Wrong limit scope")
            }
            other => panic!("Expected RateLimited({}), got: {:?}", scope, other),
        }
    }

    #[track_caller]
    pub fn assert_cached(outcome: &GovernedOutcome, expect_stale: bool) {
        match outcome {
            GovernedOutcome::Cached { stale, .. } => {
                assert_eq!(*stale, expect_stale, "Wrong staleness flag")
            }
            other => panic!("Expected Cached, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &DamperResult<T>) {
        match result {
            Err(DamperError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
