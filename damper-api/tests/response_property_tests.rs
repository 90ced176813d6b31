//! Property-Based Tests for Governed Responses
//!
//! **Property 1: One Outcome, One Flag**
//!
//! For any governed outcome, the response SHALL set at most one of
//! `rateLimited`, `sampled`, `loopDetected` and `cached`, and `success` SHALL
//! match the outcome's own success classification.
//!
//! **Property 2: Batch Summary Accounts For Every Entity**
//!
//! For any list of outcomes, `successful + failed` SHALL equal `total`,
//! `total` SHALL equal the number of results, and `skipped` SHALL never
//! exceed `successful`.
//!
//! **Property 3: Only The First Status Check Reaches The Source**
//!
//! For any number of back-to-back status checks over HTTP, exactly one
//! response SHALL be uncached.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use damper_api::{create_api_router, AppState, GovernedBatchResponse, GovernedResponse};
use damper_core::{
    BatchOutcome, BatchSummary, CachedPayload, EntityOutcome, GovernedOutcome, LimitScope,
    OperationSummary,
};
use damper_governor::{collections, AdmissionDeps, FixedSampler, Governor};
use damper_storage::{InMemoryCounterStore, InMemoryDocumentStore, InMemoryRecencyStore};
use damper_test_utils::fixtures::{self, TENANT};
use proptest::prelude::*;
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tower::ServiceExt;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn arb_outcome() -> impl Strategy<Value = GovernedOutcome> {
    let reason = "[a-z ]{1,20}";
    prop_oneof![
        prop_oneof![Just(LimitScope::Global), Just(LimitScope::Entity)]
            .prop_map(|scope| GovernedOutcome::RateLimited { scope }),
        Just(GovernedOutcome::Sampled),
        Just(GovernedOutcome::LoopDetected),
        Just(GovernedOutcome::NotFound),
        (0usize..50, 0usize..50, 0usize..5).prop_map(|(updated, deleted, failed)| {
            GovernedOutcome::Succeeded(OperationSummary {
                updated_count: updated,
                deleted_count: deleted,
                failed_count: failed,
                data: None,
            })
        }),
        reason.prop_map(|reason| GovernedOutcome::Failed { reason }),
        (any::<bool>(), any::<bool>()).prop_map(|(found, stale)| GovernedOutcome::Cached {
            payload: if found {
                CachedPayload::Found {
                    data: json!({"emailConnected": true}),
                }
            } else {
                CachedPayload::NotFound
            },
            stale,
        }),
    ]
}

fn flag(response: &GovernedResponse) -> usize {
    [
        response.rate_limited,
        response.sampled,
        response.loop_detected,
        response.cached,
    ]
    .iter()
    .filter(|f| **f == Some(true))
    .count()
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// **Property 1: One Outcome, One Flag**
    #[test]
    fn prop_response_sets_at_most_one_flag(outcome in arb_outcome()) {
        let response = GovernedResponse::from_outcome("e1", &outcome);

        prop_assert!(flag(&response) <= 1);
        prop_assert_eq!(response.success, outcome.is_success());
        prop_assert_eq!(response.entity_id.as_str(), "e1");
        if outcome.is_admission_rejection() {
            prop_assert!(response.success);
            prop_assert_eq!(flag(&response), 1);
        }
    }

    /// **Property 2: Batch Summary Accounts For Every Entity**
    #[test]
    fn prop_batch_summary_accounts_for_every_entity(
        outcomes in prop::collection::vec(arb_outcome(), 1..50)
    ) {
        let summary = BatchSummary::from_outcomes(outcomes.iter());
        let batch = BatchOutcome {
            results: outcomes
                .into_iter()
                .enumerate()
                .map(|(i, outcome)| EntityOutcome {
                    entity_id: format!("e{}", i),
                    outcome,
                })
                .collect(),
            summary,
        };

        let response = GovernedBatchResponse::from(&batch);
        prop_assert_eq!(response.results.len(), response.summary.total);
        prop_assert_eq!(
            response.summary.successful + response.summary.failed,
            response.summary.total
        );
        prop_assert!(response.summary.skipped <= response.summary.successful);
    }

    /// **Property 3: Only The First Status Check Reaches The Source**
    #[test]
    fn prop_only_first_status_check_is_uncached(calls in 1usize..15) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let documents = Arc::new(InMemoryDocumentStore::new());
            fixtures::seed(
                documents.as_ref(),
                collections::USERS,
                [("u1".to_string(), fixtures::user_status())],
            )
            .await
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

            let deps = AdmissionDeps {
                counters: Arc::new(InMemoryCounterStore::new()),
                recency: Arc::new(InMemoryRecencyStore::new()),
                sampler: Arc::new(FixedSampler::always()),
                clock: Arc::new(fixtures::manual_clock()),
            };
            let governor = Governor::new(fixtures::deterministic_config(), documents, deps)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let app = create_api_router(AppState::new(Arc::new(governor), "memory"), Vec::new());

            let mut uncached = 0;
            for _ in 0..calls {
                let request = Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/governed/status-check")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"tenantId": TENANT, "entityId": "u1"}).to_string(),
                    ))
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;

                let response = app
                    .clone()
                    .oneshot(request)
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(response.status(), StatusCode::OK);

                let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                let body: Value = serde_json::from_slice(&body)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                if body.get("cached").is_none() {
                    uncached += 1;
                }
            }

            prop_assert_eq!(uncached, 1);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
