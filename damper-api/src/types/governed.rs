//! Governed operation request and response types.

use damper_core::{BatchOutcome, BatchSummary, CachedPayload, GovernedOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

// ============================================================================
// REQUESTS
// ============================================================================

/// Request to run one governed operation for one entity.
///
/// Missing ids deserialize as empty strings so the governor reports them
/// with its own validation message.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GovernedRequest {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub entity_id: String,
    /// Bypass rate limiting, sampling, recency and cache.
    #[serde(default)]
    pub force: bool,
}

/// Request to run one governed operation for up to `maxEntities` entities.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GovernedBatchRequest {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub entity_ids: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

// ============================================================================
// RESPONSES
// ============================================================================

/// Outcome of one governed invocation.
///
/// `success` is true for applied changes, positive cache hits and admission
/// rejections (skipping is healthy). It is false for missing sources,
/// failures and cached negative results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GovernedResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limited: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_detected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_found: Option<bool>,
    pub message: String,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
}

impl GovernedResponse {
    pub fn from_outcome(entity_id: impl Into<String>, outcome: &GovernedOutcome) -> Self {
        let mut response = Self {
            success: outcome.is_success(),
            message: outcome.message(),
            entity_id: entity_id.into(),
            ..Self::default()
        };

        match outcome {
            GovernedOutcome::RateLimited { .. } => response.rate_limited = Some(true),
            GovernedOutcome::Sampled => response.sampled = Some(true),
            GovernedOutcome::LoopDetected => response.loop_detected = Some(true),
            GovernedOutcome::Cached { payload, stale } => {
                response.cached = Some(true);
                response.stale = Some(*stale);
                match payload {
                    CachedPayload::Found { data } => response.data = Some(data.clone()),
                    CachedPayload::NotFound => response.not_found = Some(true),
                    CachedPayload::Failed { reason } => {
                        response.message = format!("Served from cache: {}", reason);
                    }
                }
            }
            GovernedOutcome::NotFound => response.not_found = Some(true),
            GovernedOutcome::Succeeded(summary) => {
                response.updated_count = Some(summary.updated_count);
                response.deleted_count = Some(summary.deleted_count);
                response.data = summary.data.clone();
            }
            GovernedOutcome::Failed { .. } => {}
        }
        response
    }
}

/// Counts over a batch; `skipped` admission rejections are also counted in
/// `successful`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GovernedBatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl From<BatchSummary> for GovernedBatchSummary {
    fn from(summary: BatchSummary) -> Self {
        Self {
            total: summary.total,
            successful: summary.successful,
            failed: summary.failed,
            skipped: summary.skipped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GovernedBatchResponse {
    pub results: Vec<GovernedResponse>,
    pub summary: GovernedBatchSummary,
}

impl From<&BatchOutcome> for GovernedBatchResponse {
    fn from(batch: &BatchOutcome) -> Self {
        Self {
            results: batch
                .results
                .iter()
                .map(|r| GovernedResponse::from_outcome(r.entity_id.clone(), &r.outcome))
                .collect(),
            summary: batch.summary.into(),
        }
    }
}
