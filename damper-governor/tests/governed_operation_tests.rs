//! End-to-end tests of the admission pipeline against in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use damper_core::{
    CachedPayload, CounterKey, CounterRecord, DamperResult, GovernedOutcome, LimitScope,
    MirrorDocument, OperationConfig, OperationKind, StorageError, Timestamp, ValidationError,
    WritePolicy,
};
use damper_governor::{
    collections, AdmissionDeps, FanoutTarget, FixedSampler, GovernedOperation, LocationProjector,
    MirrorTarget, Sampler, SnapshotProjector, StatusProjector,
};
use damper_storage::{
    Acquisition, BoundedBatchWriter, CounterLimit, CounterStore, DocumentStore,
    InMemoryCounterStore, InMemoryDocumentStore, InMemoryRecencyStore,
};
use damper_test_utils::assertions::{assert_cached, assert_rate_limited, assert_succeeded};
use damper_test_utils::fixtures::{self, entity, TENANT};
use damper_test_utils::{CountingFetcher, InstrumentedDocumentStore, ManualClock};
use serde_json::json;

struct Harness {
    clock: ManualClock,
    counters: Arc<InMemoryCounterStore>,
    recency: Arc<InMemoryRecencyStore>,
    documents: Arc<InMemoryDocumentStore>,
    fetcher: Arc<CountingFetcher>,
    sampler: Arc<dyn Sampler>,
}

impl Harness {
    fn new(source: &str) -> Self {
        Self {
            clock: fixtures::manual_clock(),
            counters: Arc::new(InMemoryCounterStore::new()),
            recency: Arc::new(InMemoryRecencyStore::new()),
            documents: Arc::new(InMemoryDocumentStore::new()),
            fetcher: Arc::new(CountingFetcher::new(source)),
            sampler: Arc::new(FixedSampler::always()),
        }
    }

    fn with_sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.sampler = sampler;
        self
    }

    fn deps(&self) -> AdmissionDeps {
        AdmissionDeps {
            counters: self.counters.clone(),
            recency: self.recency.clone(),
            sampler: Arc::clone(&self.sampler),
            clock: Arc::new(self.clock.clone()),
        }
    }

    fn config(kind: OperationKind) -> OperationConfig {
        fixtures::deterministic_config().for_kind(kind).clone()
    }

    fn mirror_update(&self, config: OperationConfig) -> GovernedOperation {
        GovernedOperation::new(
            config,
            self.deps(),
            self.fetcher.clone(),
            Arc::new(LocationProjector),
            Arc::new(MirrorTarget::new(
                self.documents.clone(),
                collections::LOCATION_MIRRORS,
                "mirror-update",
            )),
        )
    }

    fn status_check(&self, config: OperationConfig) -> GovernedOperation {
        GovernedOperation::new(
            config,
            self.deps(),
            self.fetcher.clone(),
            Arc::new(StatusProjector),
            Arc::new(MirrorTarget::new(
                self.documents.clone(),
                collections::USER_STATUS,
                "status-check",
            )),
        )
    }

    fn snapshot_fanout(
        &self,
        config: OperationConfig,
        store: Arc<dyn DocumentStore>,
    ) -> GovernedOperation {
        let writer = BoundedBatchWriter::new(Arc::clone(&store), config.write.clone());
        GovernedOperation::new(
            config,
            self.deps(),
            self.fetcher.clone(),
            Arc::new(SnapshotProjector),
            Arc::new(FanoutTarget::new(
                store,
                writer,
                collections::DEALS,
                collections::DEAL_COMPANY_KEY,
                collections::DEAL_SNAPSHOT_FIELD,
            )),
        )
    }

    async fn mirror(&self, id: &str) -> DamperResult<Option<MirrorDocument>> {
        let doc = self
            .documents
            .get(TENANT, collections::LOCATION_MIRRORS, id)
            .await?;
        Ok(doc.as_ref().and_then(MirrorDocument::from_document))
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn test_location_mirror_follows_state_validity() -> DamperResult<()> {
    let h = Harness::new("locations");
    let op = h.mirror_update(Harness::config(OperationKind::MirrorUpdate));
    let loc = entity("loc-1");

    h.fetcher.insert(loc.clone(), fixtures::location("California"));
    assert_succeeded(&op.invoke(&loc, false).await?);
    let mirror = h.mirror("loc-1").await?;
    assert_eq!(
        mirror.and_then(|m| m.derived_fields.get("stateCode").cloned()),
        Some(json!("CA"))
    );

    h.clock.advance(Duration::from_secs(6 * 60));
    h.fetcher.insert(loc.clone(), json!({"name": "Office", "state": "Qwerty"}));
    let outcome = op.invoke(&loc, false).await?;
    match &outcome {
        GovernedOutcome::Succeeded(summary) => assert_eq!(summary.deleted_count, 1),
        other => panic!("Expected Succeeded, got: {:?}", other),
    }
    assert!(h.mirror("loc-1").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_repeated_status_checks_hit_upstream_once() -> DamperResult<()> {
    let h = Harness::new("users");
    let op = h.status_check(Harness::config(OperationKind::StatusCheck));
    let u1 = entity("u1");
    h.fetcher.insert(u1.clone(), fixtures::user_status());

    let first = op.invoke(&u1, false).await?;
    assert_succeeded(&first);

    for _ in 0..9 {
        h.clock.advance(Duration::from_millis(100));
        let outcome = op.invoke(&u1, false).await?;
        assert_cached(&outcome, false);
        assert!(outcome.is_success());
    }
    assert_eq!(h.fetcher.fetch_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_sixth_call_in_hour_is_rate_limited() -> DamperResult<()> {
    let h = Harness::new("companies");
    let config = Harness::config(OperationKind::SnapshotFanout).with_per_entity_cap(5);
    let op = h.snapshot_fanout(config, h.documents.clone());
    let c1 = entity("c1");
    h.fetcher.insert(c1.clone(), fixtures::company("Acme"));

    for call in 1..=5 {
        let outcome = op.invoke(&c1, false).await?;
        assert!(
            matches!(outcome, GovernedOutcome::Succeeded(_)),
            "call {call}: {outcome:?}"
        );
        // Past the recency TTL, still inside the hour.
        h.clock.advance(Duration::from_secs(6 * 60));
    }

    let sixth = op.invoke(&c1, false).await?;
    assert_rate_limited(&sixth, LimitScope::Entity);
    assert!(sixth.is_success());
    assert_eq!(h.fetcher.fetch_count(), 5);
    Ok(())
}

#[tokio::test]
async fn test_oversized_batch_rejected_before_admission() -> DamperResult<()> {
    let h = Harness::new("companies");
    let op = h.snapshot_fanout(
        Harness::config(OperationKind::SnapshotFanout),
        h.documents.clone(),
    );
    let ids: Vec<String> = (0..51).map(|i| format!("c{i}")).collect();

    let result = op.invoke_batch(TENANT, &ids, false).await;
    match result {
        Err(damper_core::DamperError::Validation(ValidationError::BatchSizeOutOfRange {
            max,
            got,
            ..
        })) => {
            assert_eq!((max, got), (50, 51));
        }
        other => panic!("Expected batch size validation error, got: {:?}", other),
    }
    assert_eq!(h.fetcher.fetch_count(), 0);
    assert!(h.counters.is_empty().await);
    assert!(h.recency.is_empty().await);

    let message = op
        .validate_batch(TENANT, &ids)
        .err()
        .map(|e| e.to_string())
        .unwrap_or_default();
    assert!(message.contains("entityIds must contain between 1 and 50 entries"));
    Ok(())
}

// ============================================================================
// ADMISSION PIPELINE
// ============================================================================

#[tokio::test]
async fn test_second_call_within_ttl_is_loop_detected_unless_forced() -> DamperResult<()> {
    let h = Harness::new("locations");
    let op = h.mirror_update(Harness::config(OperationKind::MirrorUpdate));
    let loc = entity("loc-1");
    h.fetcher.insert(loc.clone(), fixtures::location("Ohio"));

    assert_succeeded(&op.invoke(&loc, false).await?);
    h.clock.advance(Duration::from_secs(60));
    assert_eq!(op.invoke(&loc, false).await?, GovernedOutcome::LoopDetected);
    assert_succeeded(&op.invoke(&loc, true).await?);
    assert_eq!(h.fetcher.fetch_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_sampled_calls_do_no_work() -> DamperResult<()> {
    let h = Harness::new("companies").with_sampler(Arc::new(FixedSampler::never()));
    let config = Harness::config(OperationKind::SnapshotFanout).with_sampling_rate(0.8);
    let op = h.snapshot_fanout(config, h.documents.clone());
    let c1 = entity("c1");
    h.fetcher.insert(c1.clone(), fixtures::company("Acme"));

    assert_eq!(op.invoke(&c1, false).await?, GovernedOutcome::Sampled);
    assert_eq!(h.fetcher.fetch_count(), 0);
    assert!(h.counters.is_empty().await);

    // Forced calls bypass the sampler.
    assert_succeeded(&op.invoke(&c1, true).await?);
    Ok(())
}

#[tokio::test]
async fn test_forced_calls_still_charge_counters() -> DamperResult<()> {
    let h = Harness::new("companies");
    let config = Harness::config(OperationKind::SnapshotFanout).with_per_entity_cap(2);
    let op = h.snapshot_fanout(config, h.documents.clone());
    let c1 = entity("c1");
    h.fetcher.insert(c1.clone(), fixtures::company("Acme"));

    for _ in 0..3 {
        assert_succeeded(&op.invoke(&c1, true).await?);
    }
    h.clock.advance(Duration::from_secs(6 * 60));
    assert_rate_limited(&op.invoke(&c1, false).await?, LimitScope::Entity);
    Ok(())
}

#[tokio::test]
async fn test_missing_source_is_not_found() -> DamperResult<()> {
    let h = Harness::new("locations");
    let op = h.mirror_update(Harness::config(OperationKind::MirrorUpdate));

    let outcome = op.invoke(&entity("ghost"), false).await?;
    assert_eq!(outcome, GovernedOutcome::NotFound);
    assert!(!outcome.is_success());
    Ok(())
}

#[tokio::test]
async fn test_blank_entity_is_a_validation_error() {
    let h = Harness::new("locations");
    let op = h.mirror_update(Harness::config(OperationKind::MirrorUpdate));
    let result = op.invoke(&entity("  "), false).await;
    damper_test_utils::assertions::assert_validation_error(&result);
}

// ============================================================================
// CACHE BEHAVIOUR
// ============================================================================

#[tokio::test]
async fn test_cache_serves_stale_until_hard_cap() -> DamperResult<()> {
    let h = Harness::new("users");
    let op = h.status_check(Harness::config(OperationKind::StatusCheck));
    let u1 = entity("u1");
    h.fetcher.insert(u1.clone(), fixtures::user_status());

    assert_succeeded(&op.invoke(&u1, false).await?);

    h.clock.advance(Duration::from_secs(45 * 60));
    assert_cached(&op.invoke(&u1, false).await?, true);
    assert_eq!(h.fetcher.fetch_count(), 1);

    h.clock.advance(Duration::from_secs(20 * 60));
    assert_succeeded(&op.invoke(&u1, false).await?);
    assert_eq!(h.fetcher.fetch_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_upstream_failure_is_cached() -> DamperResult<()> {
    let h = Harness::new("users");
    let op = h.status_check(Harness::config(OperationKind::StatusCheck));
    let u1 = entity("u1");
    h.fetcher.set_failure(Some("provider unavailable"));

    let first = op.invoke(&u1, false).await?;
    assert!(matches!(first, GovernedOutcome::Failed { .. }));

    let second = op.invoke(&u1, false).await?;
    match &second {
        GovernedOutcome::Cached {
            payload: CachedPayload::Failed { reason },
            stale: false,
        } => assert!(reason.contains("provider unavailable")),
        other => panic!("Expected cached failure, got: {:?}", other),
    }
    assert!(!second.is_success());
    assert_eq!(h.fetcher.fetch_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_forced_status_check_refreshes_cache() -> DamperResult<()> {
    let h = Harness::new("users");
    let op = h.status_check(Harness::config(OperationKind::StatusCheck));
    let u1 = entity("u1");
    h.fetcher.insert(u1.clone(), fixtures::user_status());

    op.invoke(&u1, false).await?;
    h.fetcher
        .insert(u1.clone(), json!({"emailConnected": false, "grantStatus": "expired"}));
    let forced = op.invoke(&u1, true).await?;
    match &forced {
        GovernedOutcome::Succeeded(summary) => {
            assert_eq!(
                summary.data.as_ref().and_then(|d| d.get("grantStatus")),
                Some(&json!("expired"))
            );
        }
        other => panic!("Expected Succeeded, got: {:?}", other),
    }

    match op.invoke(&u1, false).await? {
        GovernedOutcome::Cached {
            payload: CachedPayload::Found { data },
            ..
        } => assert_eq!(data.get("emailConnected"), Some(&json!(false))),
        other => panic!("Expected cached refreshed value, got: {:?}", other),
    }
    Ok(())
}

/// Counter store whose atomic acquire always fails.
struct UnavailableCounterStore(InMemoryCounterStore);

#[async_trait]
impl CounterStore for UnavailableCounterStore {
    async fn get(&self, key: &CounterKey) -> DamperResult<Option<CounterRecord>> {
        self.0.get(key).await
    }

    async fn increment(&self, key: &CounterKey, now: Timestamp) -> DamperResult<u32> {
        self.0.increment(key, now).await
    }

    async fn try_acquire(
        &self,
        _limits: &[CounterLimit],
        _now: Timestamp,
    ) -> DamperResult<Acquisition> {
        Err(StorageError::TransactionFailed {
            reason: "counter store unavailable".to_string(),
        }
        .into())
    }

    async fn prune_before(&self, scope: OperationKind, window_id: i64) -> DamperResult<u64> {
        self.0.prune_before(scope, window_id).await
    }
}

#[tokio::test]
async fn test_coordination_failure_is_not_cached() -> DamperResult<()> {
    let h = Harness::new("users");
    let deps = AdmissionDeps {
        counters: Arc::new(UnavailableCounterStore(InMemoryCounterStore::new())),
        ..h.deps()
    };
    let op = GovernedOperation::new(
        Harness::config(OperationKind::StatusCheck),
        deps,
        h.fetcher.clone(),
        Arc::new(StatusProjector),
        Arc::new(MirrorTarget::new(
            h.documents.clone(),
            collections::USER_STATUS,
            "status-check",
        )),
    );
    let u1 = entity("u1");
    h.fetcher.insert(u1.clone(), fixtures::user_status());

    match op.invoke(&u1, false).await? {
        GovernedOutcome::Failed { reason } => assert!(reason.contains("unavailable")),
        other => panic!("Expected Failed, got: {:?}", other),
    }
    assert_eq!(h.fetcher.fetch_count(), 0);
    assert_eq!(op.cache().map(|cache| cache.len()), Some(0));
    Ok(())
}

// ============================================================================
// FANOUT AND BATCHES
// ============================================================================

#[tokio::test]
async fn test_fanout_respects_write_bounds() -> DamperResult<()> {
    let h = Harness::new("companies");
    let store = Arc::new(InstrumentedDocumentStore::new().with_commit_delay(Duration::from_millis(5)));
    let deals = (0..1000).map(|i| (format!("d{i:04}"), fixtures::deal("c1")));
    fixtures::seed(store.as_ref(), collections::DEALS, deals).await?;

    let config = Harness::config(OperationKind::SnapshotFanout).with_write(WritePolicy {
        max_batch_size: 450,
        max_concurrency: 2,
        inter_batch_delay: Duration::ZERO,
    });
    let op = h.snapshot_fanout(config, store.clone());
    let c1 = entity("c1");
    h.fetcher.insert(c1.clone(), fixtures::company("Acme"));

    match op.invoke(&c1, false).await? {
        GovernedOutcome::Succeeded(summary) => assert_eq!(summary.updated_count, 1000),
        other => panic!("Expected Succeeded, got: {:?}", other),
    }
    assert_eq!(store.batch_count(), 3);
    assert!(store.max_batch_size() <= 450);
    assert!(store.max_in_flight() <= 2);

    let d0 = store.get(TENANT, collections::DEALS, "d0000").await?;
    assert_eq!(
        d0.and_then(|d| d.get("companySnapshot").cloned()),
        Some(json!({
            "name": "Acme",
            "industry": "Staffing",
            "website": "https://example.com",
            "city": "Austin",
            "state": "TX"
        }))
    );
    Ok(())
}

#[tokio::test]
async fn test_partial_fanout_failure_is_reported() -> DamperResult<()> {
    let h = Harness::new("companies");
    let store = Arc::new(InstrumentedDocumentStore::new());
    let deals = (0..10).map(|i| (format!("d{i}"), fixtures::deal("c1")));
    fixtures::seed(store.as_ref(), collections::DEALS, deals).await?;
    store.fail_batches_touching("d9");

    let config = Harness::config(OperationKind::SnapshotFanout).with_write(WritePolicy {
        max_batch_size: 4,
        max_concurrency: 3,
        inter_batch_delay: Duration::ZERO,
    });
    let op = h.snapshot_fanout(config, store.clone());
    let c1 = entity("c1");
    h.fetcher.insert(c1.clone(), fixtures::company("Acme"));

    let outcome = op.invoke(&c1, false).await?;
    match &outcome {
        GovernedOutcome::Succeeded(summary) => {
            assert_eq!(summary.updated_count, 8);
            assert_eq!(summary.failed_count, 2);
        }
        other => panic!("Expected Succeeded, got: {:?}", other),
    }
    assert!(!outcome.is_success());
    assert_eq!(outcome.label(), "partially_applied");
    Ok(())
}

#[tokio::test]
async fn test_fanout_with_every_chunk_failing_is_a_failure() -> DamperResult<()> {
    let h = Harness::new("companies");
    let store = Arc::new(InstrumentedDocumentStore::new());
    let deals = (0..3).map(|i| (format!("d{i}"), fixtures::deal("c1")));
    fixtures::seed(store.as_ref(), collections::DEALS, deals).await?;
    for i in 0..3 {
        store.fail_batches_touching(format!("d{i}"));
    }

    let config = Harness::config(OperationKind::SnapshotFanout).with_write(WritePolicy {
        max_batch_size: 1,
        max_concurrency: 3,
        inter_batch_delay: Duration::ZERO,
    });
    let op = h.snapshot_fanout(config, store.clone());
    let c1 = entity("c1");
    h.fetcher.insert(c1.clone(), fixtures::company("Acme"));

    let outcome = op.invoke(&c1, false).await?;
    match &outcome {
        GovernedOutcome::Failed { reason } => {
            assert!(reason.contains("every fanout chunk failed"))
        }
        other => panic!("Expected Failed, got: {:?}", other),
    }
    assert_eq!(outcome.label(), "failed");
    assert!(!outcome.is_success());

    let d0 = store.get(TENANT, collections::DEALS, "d0").await?;
    assert!(d0.and_then(|d| d.get("companySnapshot").cloned()).is_none());
    Ok(())
}

#[tokio::test]
async fn test_batch_reports_each_entity() -> DamperResult<()> {
    let h = Harness::new("locations");
    let op = h.mirror_update(Harness::config(OperationKind::MirrorUpdate));
    h.fetcher.insert(entity("loc-1"), fixtures::location("Texas"));
    h.fetcher.insert(entity("loc-2"), fixtures::location("Qwerty"));

    // loc-3 was processed moments ago.
    h.fetcher.insert(entity("loc-3"), fixtures::location("Utah"));
    op.invoke(&entity("loc-3"), false).await?;

    let ids: Vec<String> = ["loc-1", "loc-2", "loc-3", "ghost"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let batch = op.invoke_batch(TENANT, &ids, false).await?;

    let labels: Vec<_> = batch.results.iter().map(|r| r.outcome.label()).collect();
    assert_eq!(
        labels,
        vec!["succeeded", "succeeded", "loop_detected", "not_found"]
    );
    assert_eq!(batch.summary.total, 4);
    assert_eq!(batch.summary.successful, 3);
    assert_eq!(batch.summary.failed, 1);
    assert_eq!(batch.summary.skipped, 1);
    Ok(())
}

#[tokio::test]
async fn test_batch_rejects_blank_ids() {
    let h = Harness::new("locations");
    let op = h.mirror_update(Harness::config(OperationKind::MirrorUpdate));
    let ids = vec!["loc-1".to_string(), " ".to_string()];

    let result = op.invoke_batch(TENANT, &ids, false).await;
    damper_test_utils::assertions::assert_validation_error(&result);
    let empty = op.invoke_batch(TENANT, &[], false).await;
    damper_test_utils::assertions::assert_validation_error(&empty);
}

#[tokio::test]
async fn test_rate_limit_counters_live_in_shared_store() -> DamperResult<()> {
    let h = Harness::new("locations");
    let config = Harness::config(OperationKind::MirrorUpdate).with_global_cap(1);
    let first = h.mirror_update(config.clone());
    let second = h.mirror_update(config);
    h.fetcher.insert(entity("a"), fixtures::location("Iowa"));
    h.fetcher.insert(entity("b"), fixtures::location("Iowa"));

    assert_succeeded(&first.invoke(&entity("a"), false).await?);
    assert_rate_limited(&second.invoke(&entity("b"), false).await?, LimitScope::Global);

    let window = damper_core::CounterKey::window_id_at(
        fixtures::window_start(),
        Duration::from_secs(3600),
    );
    let global = damper_core::CounterKey::new(
        OperationKind::MirrorUpdate,
        damper_core::CounterSubject::Global,
        window,
    );
    assert_eq!(h.counters.get(&global).await?.map(|r| r.count), Some(1));
    Ok(())
}
