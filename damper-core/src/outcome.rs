//! Projection results and governed operation outcomes

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entities::LimitScope;

/// Result of projecting a source entity onto its dependent aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Projection {
    /// Derived fields to upsert.
    Derived { fields: Map<String, Value> },
    /// The source no longer yields a valid aggregate; delete it.
    Invalid { reason: String },
}

impl Projection {
    pub fn derived(fields: Map<String, Value>) -> Self {
        Projection::Derived { fields }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Projection::Invalid {
            reason: reason.into(),
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Projection::Invalid { .. })
    }

    pub fn fields(&self) -> Option<&Map<String, Value>> {
        match self {
            Projection::Derived { fields } => Some(fields),
            Projection::Invalid { .. } => None,
        }
    }
}

/// Payload remembered by the freshness cache for one entity.
///
/// Negative and failed results are cached as well so that a failing
/// dependency is not re-queried on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CachedPayload {
    Found { data: Value },
    NotFound,
    Failed { reason: String },
}

impl CachedPayload {
    pub fn is_found(&self) -> bool {
        matches!(self, CachedPayload::Found { .. })
    }
}

/// What a successful execution did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub updated_count: usize,
    pub deleted_count: usize,
    /// Mutations whose chunk failed to commit.
    pub failed_count: usize,
    /// Operation-specific payload (derived fields, snapshot data, status).
    pub data: Option<Value>,
}

/// Discriminated result of one governed invocation.
///
/// Admission rejections are ordinary outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GovernedOutcome {
    RateLimited { scope: LimitScope },
    Sampled,
    LoopDetected,
    Cached { payload: CachedPayload, stale: bool },
    NotFound,
    Succeeded(OperationSummary),
    Failed { reason: String },
}

impl GovernedOutcome {
    /// Stable label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            GovernedOutcome::RateLimited { .. } => "rate_limited",
            GovernedOutcome::Sampled => "sampled",
            GovernedOutcome::LoopDetected => "loop_detected",
            GovernedOutcome::Cached { .. } => "cached",
            GovernedOutcome::NotFound => "not_found",
            GovernedOutcome::Succeeded(summary) if summary.failed_count > 0 => "partially_applied",
            GovernedOutcome::Succeeded(_) => "succeeded",
            GovernedOutcome::Failed { .. } => "failed",
        }
    }

    /// Intentionally skipped by the admission pipeline.
    pub fn is_admission_rejection(&self) -> bool {
        matches!(
            self,
            GovernedOutcome::RateLimited { .. }
                | GovernedOutcome::Sampled
                | GovernedOutcome::LoopDetected
        )
    }

    /// Whether a caller should treat the invocation as healthy.
    pub fn is_success(&self) -> bool {
        match self {
            GovernedOutcome::Succeeded(summary) => summary.failed_count == 0,
            GovernedOutcome::Cached { payload, .. } => payload.is_found(),
            GovernedOutcome::NotFound | GovernedOutcome::Failed { .. } => false,
            _ => self.is_admission_rejection(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            GovernedOutcome::RateLimited { scope } => {
                format!("Skipped: {} rate limit reached for this window", scope)
            }
            GovernedOutcome::Sampled => "Skipped: shed by sampling".to_string(),
            GovernedOutcome::LoopDetected => {
                "Skipped: entity was processed recently".to_string()
            }
            GovernedOutcome::Cached { stale: false, .. } => "Served from cache".to_string(),
            GovernedOutcome::Cached { stale: true, .. } => {
                "Served from cache (stale, within hard cap)".to_string()
            }
            GovernedOutcome::NotFound => "Source entity not found".to_string(),
            GovernedOutcome::Succeeded(summary) if summary.failed_count > 0 => format!(
                "Partially applied: {} updated, {} deleted, {} failed",
                summary.updated_count, summary.deleted_count, summary.failed_count
            ),
            GovernedOutcome::Succeeded(summary) => format!(
                "Applied: {} updated, {} deleted",
                summary.updated_count, summary.deleted_count
            ),
            GovernedOutcome::Failed { reason } => format!("Failed: {}", reason),
        }
    }
}

/// Outcome for one entity of a batch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityOutcome {
    pub entity_id: String,
    pub outcome: GovernedOutcome,
}

/// Aggregate counts over a batch.
///
/// `skipped` counts admission rejections, which are also included in
/// `successful`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchSummary {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a GovernedOutcome>) -> Self {
        let mut summary = BatchSummary::default();
        for outcome in outcomes {
            summary.total += 1;
            if outcome.is_success() {
                summary.successful += 1;
            } else {
                summary.failed += 1;
            }
            if outcome.is_admission_rejection() {
                summary.skipped += 1;
            }
        }
        summary
    }
}

/// Result of a batch invocation, in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub results: Vec<EntityOutcome>,
    pub summary: BatchSummary,
}

impl BatchOutcome {
    pub fn new(results: Vec<EntityOutcome>) -> Self {
        let summary = BatchSummary::from_outcomes(results.iter().map(|r| &r.outcome));
        Self { results, summary }
    }
}
