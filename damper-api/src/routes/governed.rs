//! Governed Operation REST Routes
//!
//! One route per operation plus its batch form:
//!
//! - `POST /api/v1/governed/{operation}`
//! - `POST /api/v1/governed/{operation}/batch`
//!
//! Admission rejections come back as `200` with the matching flag set.
//! Only malformed input produces an error status.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::post,
    Json, Router,
};
use damper_core::{EntityRef, OperationKind};
use damper_governor::Governor;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::telemetry::METRICS;
use crate::types::{
    GovernedBatchRequest, GovernedBatchResponse, GovernedRequest, GovernedResponse,
};

fn parse_operation(operation: &str) -> ApiResult<OperationKind> {
    OperationKind::from_str(operation).map_err(|e| ApiError::operation_not_found(e.to_string()))
}

fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::invalid_input(rejection.body_text()))
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/governed/{operation} - Run one governed operation
#[utoipa::path(
    post,
    path = "/api/v1/governed/{operation}",
    tag = "Governed",
    params(
        ("operation" = String, Path, description = "snapshot-fanout, mirror-update or status-check")
    ),
    request_body = GovernedRequest,
    responses(
        (status = 200, description = "Invocation finished (including admission skips)", body = GovernedResponse),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown operation", body = ApiError),
    ),
    security(("api_key" = []))
)]
pub async fn invoke_governed(
    State(governor): State<Arc<Governor>>,
    Path(operation): Path<String>,
    payload: Result<Json<GovernedRequest>, JsonRejection>,
) -> ApiResult<Json<GovernedResponse>> {
    let kind = parse_operation(&operation)?;
    let req = parse_body(payload)?;
    let entity = EntityRef::new(req.tenant_id, req.entity_id);

    let start = Instant::now();
    let outcome = governor.invoke(kind, &entity, req.force).await?;

    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_governed(kind, &outcome, start.elapsed().as_secs_f64());
    }

    Ok(Json(GovernedResponse::from_outcome(entity.entity_id, &outcome)))
}

/// POST /api/v1/governed/{operation}/batch - Run one operation for many entities
#[utoipa::path(
    post,
    path = "/api/v1/governed/{operation}/batch",
    tag = "Governed",
    params(
        ("operation" = String, Path, description = "snapshot-fanout, mirror-update or status-check")
    ),
    request_body = GovernedBatchRequest,
    responses(
        (status = 200, description = "Per-entity results and summary", body = GovernedBatchResponse),
        (status = 400, description = "Empty, oversized or malformed entity list", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown operation", body = ApiError),
    ),
    security(("api_key" = []))
)]
pub async fn invoke_governed_batch(
    State(governor): State<Arc<Governor>>,
    Path(operation): Path<String>,
    payload: Result<Json<GovernedBatchRequest>, JsonRejection>,
) -> ApiResult<Json<GovernedBatchResponse>> {
    let kind = parse_operation(&operation)?;
    let req = parse_body(payload)?;

    let batch = governor
        .invoke_batch(kind, &req.tenant_id, &req.entity_ids, req.force)
        .await?;

    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_batch(kind, &batch.summary);
        for result in &batch.results {
            metrics
                .governed_operations_total
                .with_label_values(&[kind.as_str(), result.outcome.label()])
                .inc();
        }
    }

    Ok(Json(GovernedBatchResponse::from(&batch)))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/:operation", post(invoke_governed))
        .route("/:operation/batch", post(invoke_governed_batch))
}
