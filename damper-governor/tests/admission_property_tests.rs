//! Property-Based Tests for the Admission Pipeline
//!
//! **Property 1: Rate Caps Hold Under Concurrency**
//!
//! For any set of concurrent callers within one window, the number of
//! admitted executions per entity SHALL NOT exceed the per-entity cap, and
//! the total SHALL NOT exceed the global cap.
//!
//! **Property 2: Invalid Projection Removes the Mirror**
//!
//! **Property 3: Forced Re-Runs Are Idempotent**
//!
//! **Property 4: Cache Law**
//!
//! A status check `δ` after a successful fetch SHALL be served from cache
//! when `δ` is under the freshness window, and SHALL fetch upstream when
//! `δ` is past the hard cap.
//!
//! **Property 5: Bounded Batch Writes**
//!
//! No commit SHALL carry more than `max_batch_size` mutations and no more
//! than `max_concurrency` commits SHALL be open at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use damper_core::{
    GovernedOutcome, MirrorDocument, Mutation, OperationConfig, OperationKind,
};
use damper_governor::{
    collections, AdmissionDeps, FixedSampler, GovernedOperation, LocationProjector, MirrorTarget,
    StatusProjector,
};
use damper_storage::{
    BoundedBatchWriter, DocumentStore, InMemoryCounterStore, InMemoryDocumentStore,
    InMemoryRecencyStore,
};
use damper_test_utils::fixtures::{self, entity, TENANT};
use damper_test_utils::generators::{arb_location_document, arb_write_policy};
use damper_test_utils::{CountingFetcher, InstrumentedDocumentStore, ManualClock};
use futures_util::future::join_all;
use proptest::prelude::*;
use serde_json::{Map, Value};
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

struct Setup {
    clock: ManualClock,
    documents: Arc<InMemoryDocumentStore>,
    fetcher: Arc<CountingFetcher>,
    deps: AdmissionDeps,
}

fn setup(source: &str) -> Setup {
    let clock = fixtures::manual_clock();
    let deps = AdmissionDeps {
        counters: Arc::new(InMemoryCounterStore::new()),
        recency: Arc::new(InMemoryRecencyStore::new()),
        sampler: Arc::new(FixedSampler::always()),
        clock: Arc::new(clock.clone()),
    };
    Setup {
        clock,
        documents: Arc::new(InMemoryDocumentStore::new()),
        fetcher: Arc::new(CountingFetcher::new(source)),
        deps,
    }
}

fn mirror_op(setup: &Setup, config: OperationConfig) -> GovernedOperation {
    GovernedOperation::new(
        config,
        setup.deps.clone(),
        setup.fetcher.clone(),
        Arc::new(LocationProjector),
        Arc::new(MirrorTarget::new(
            setup.documents.clone(),
            collections::LOCATION_MIRRORS,
            "mirror-update",
        )),
    )
}

fn mirror_config() -> OperationConfig {
    fixtures::deterministic_config()
        .for_kind(OperationKind::MirrorUpdate)
        .clone()
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// **Property 1: Rate Caps Hold Under Concurrency**
    #[test]
    fn prop_caps_never_exceeded(
        per_entity_cap in 1u32..6,
        global_cap in 1u32..12,
        calls in prop::collection::vec(0usize..4, 1..40),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let s = setup("locations");
            for i in 0..4 {
                s.fetcher.insert(entity(&format!("loc-{i}")), fixtures::location("Ohio"));
            }
            // Zero TTL so only the limiter decides.
            let config = mirror_config()
                .with_per_entity_cap(per_entity_cap)
                .with_global_cap(global_cap)
                .with_recency_ttl(Duration::ZERO);
            let op = Arc::new(mirror_op(&s, config));

            let invocations = calls.iter().map(|i| {
                let op = Arc::clone(&op);
                let e = entity(&format!("loc-{i}"));
                async move {
                    let outcome = op.invoke(&e, false).await;
                    (e, outcome)
                }
            });
            let results = join_all(invocations).await;

            let mut per_entity: HashMap<String, u32> = HashMap::new();
            let mut total = 0u32;
            for (e, outcome) in results {
                let outcome = outcome.map_err(|e| TestCaseError::fail(e.to_string()))?;
                if matches!(outcome, GovernedOutcome::Succeeded(_)) {
                    *per_entity.entry(e.entity_id).or_default() += 1;
                    total += 1;
                }
            }

            prop_assert!(total <= global_cap);
            for count in per_entity.values() {
                prop_assert!(*count <= per_entity_cap);
            }
            prop_assert_eq!(s.fetcher.fetch_count() as u32, total);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// **Property 2: Invalid Projection Removes the Mirror**
    #[test]
    fn prop_mirror_present_iff_projection_valid(
        before in arb_location_document(),
        after in arb_location_document(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let s = setup("locations");
            let op = mirror_op(&s, mirror_config());
            let loc = entity("loc-1");

            for fields in [before, after] {
                s.fetcher.insert(loc.clone(), fields.clone());
                let outcome = op.invoke(&loc, true).await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert!(matches!(outcome, GovernedOutcome::Succeeded(_)));

                let valid = !damper_governor::Projector::project(
                    &LocationProjector,
                    &damper_core::Document::from_value("loc-1", fields),
                )
                .is_invalid();
                let mirror = s.documents
                    .get(TENANT, collections::LOCATION_MIRRORS, "loc-1")
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(mirror.is_some(), valid);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// **Property 3: Forced Re-Runs Are Idempotent**
    #[test]
    fn prop_forced_reruns_converge(
        fields in arb_location_document(),
        runs in 2usize..5,
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let s = setup("locations");
            let op = mirror_op(&s, mirror_config());
            let loc = entity("loc-1");
            s.fetcher.insert(loc.clone(), fields);

            let mut seen: Option<Option<Map<String, Value>>> = None;
            for _ in 0..runs {
                op.invoke(&loc, true).await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                s.clock.advance(Duration::from_secs(1));

                let derived = s.documents
                    .get(TENANT, collections::LOCATION_MIRRORS, "loc-1")
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?
                    .as_ref()
                    .and_then(MirrorDocument::from_document)
                    .map(|m| m.derived_fields);
                if let Some(previous) = &seen {
                    prop_assert_eq!(previous, &derived);
                }
                seen = Some(derived);
            }
            prop_assert!(s.documents.count(TENANT, collections::LOCATION_MIRRORS).await <= 1);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// **Property 4: Cache Law**
    #[test]
    fn prop_cache_law(delta_secs in 0u64..7200) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let s = setup("users");
            let config = fixtures::deterministic_config()
                .for_kind(OperationKind::StatusCheck)
                .clone();
            let cache = config.cache.clone().unwrap_or_default();
            let op = GovernedOperation::new(
                config,
                s.deps.clone(),
                s.fetcher.clone(),
                Arc::new(StatusProjector),
                Arc::new(MirrorTarget::new(
                    s.documents.clone(),
                    collections::USER_STATUS,
                    "status-check",
                )),
            );
            let u1 = entity("u1");
            s.fetcher.insert(u1.clone(), fixtures::user_status());

            op.invoke(&u1, false).await.map_err(|e| TestCaseError::fail(e.to_string()))?;
            let delta = Duration::from_secs(delta_secs);
            s.clock.advance(delta);
            let outcome = op.invoke(&u1, false).await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            if delta < cache.freshness_window {
                prop_assert_eq!(outcome.label(), "cached");
                prop_assert_eq!(s.fetcher.fetch_count(), 1);
            } else if delta < cache.hard_cap_window {
                let stale = matches!(outcome, GovernedOutcome::Cached { stale: true, .. });
                prop_assert!(stale);
            } else {
                prop_assert_eq!(s.fetcher.fetch_count(), 2);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// **Property 5: Bounded Batch Writes**
    #[test]
    fn prop_batch_writer_bounds(policy in arb_write_policy(), count in 0usize..120) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = Arc::new(
                InstrumentedDocumentStore::new().with_commit_delay(Duration::from_millis(1)),
            );
            let writer = BoundedBatchWriter::new(store.clone(), policy.clone());
            let mutations: Vec<Mutation> = (0..count)
                .map(|i| Mutation::set("deals", &format!("d{i}"), Map::new()))
                .collect();

            let report = writer.apply_all(TENANT, mutations).await;

            prop_assert!(store.max_batch_size() <= policy.max_batch_size);
            prop_assert!(store.max_in_flight() <= policy.max_concurrency);
            prop_assert_eq!(report.mutations_applied, count);
            prop_assert_eq!(store.batch_count(), count.div_ceil(policy.max_batch_size));
            prop_assert_eq!(store.count(TENANT, "deals").await, count);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
