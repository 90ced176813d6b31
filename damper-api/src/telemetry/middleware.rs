//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Wraps every request in a tracing span and records Prometheus metrics.

use std::str::FromStr;
use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use damper_core::OperationKind;
use tracing::{info_span, Instrument};

use super::metrics::METRICS;
use crate::constants::API_PREFIX;

/// Normalize path for metrics/spans.
///
/// Unknown operations and unrouted paths are collapsed so scanners cannot
/// blow up Prometheus label cardinality.
pub(crate) fn normalize_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix(API_PREFIX) {
        let mut segments = rest.trim_start_matches('/').splitn(2, '/');
        let operation = segments.next().unwrap_or_default();
        let operation = if OperationKind::from_str(operation).is_ok() {
            operation
        } else {
            "{unknown}"
        };
        return match segments.next() {
            Some("batch") => format!("{}/{}/batch", API_PREFIX, operation),
            Some(_) => format!("{}/{}/{{other}}", API_PREFIX, operation),
            None => format!("{}/{}", API_PREFIX, operation),
        };
    }

    match path {
        "/metrics" | "/openapi.json" | "/health/ping" | "/health/live" | "/health/ready" => {
            path.to_string()
        }
        _ => "{other}".to_string(),
    }
}

/// Observability middleware for Axum.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let normalized_path = normalize_path(&path);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %normalized_path,
    );

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();

    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_http_request(
            method.as_str(),
            &normalized_path,
            status.as_u16(),
            duration.as_secs_f64(),
        );
    }

    tracing::info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = duration.as_millis() as u64,
        "Request completed"
    );

    response
}
