//! Prometheus Metrics Definitions
//!
//! Defines all DAMPER metrics with appropriate labels and types.
//! Exposes a /metrics endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use damper_core::{BatchSummary, GovernedOutcome, OperationKind};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Governed operation latency buckets (seconds). Fanouts over large deal
/// sets run far longer than a cached status check.
const OPERATION_LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0, 5.0, 15.0, 60.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<DamperMetrics>> = Lazy::new(DamperMetrics::new);

/// Container for all DAMPER metrics.
#[derive(Clone)]
pub struct DamperMetrics {
    /// Governed invocations - labels: operation, outcome
    pub governed_operations_total: CounterVec,

    /// Governed invocation duration - labels: operation
    pub governed_operation_duration_seconds: HistogramVec,

    /// Batch requests - labels: operation, status (complete/partial)
    pub batch_requests_total: CounterVec,

    /// Entries across every freshness cache
    pub cache_entries: Gauge,

    /// Entries removed by cache sweeps and trims
    pub cache_evictions_total: Counter,

    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,
}

impl DamperMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            governed_operations_total: register_counter_vec!(
                "damper_governed_operations_total",
                "Total governed invocations by outcome",
                &["operation", "outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register governed_operations_total: {}", e)))?,

            governed_operation_duration_seconds: register_histogram_vec!(
                "damper_governed_operation_duration_seconds",
                "Governed invocation duration in seconds",
                &["operation"],
                OPERATION_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register governed_operation_duration_seconds: {}", e)))?,

            batch_requests_total: register_counter_vec!(
                "damper_batch_requests_total",
                "Total batch requests",
                &["operation", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register batch_requests_total: {}", e)))?,

            cache_entries: register_gauge!(
                "damper_cache_entries",
                "Current number of freshness cache entries"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_entries: {}", e)))?,

            cache_evictions_total: register_counter!(
                "damper_cache_evictions_total",
                "Total freshness cache entries evicted by sweeps and trims"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_evictions_total: {}", e)))?,

            http_requests_total: register_counter_vec!(
                "damper_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "damper_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,
        })
    }

    /// Record one governed invocation.
    pub fn record_governed(&self, kind: OperationKind, outcome: &GovernedOutcome, duration_secs: f64) {
        self.governed_operations_total
            .with_label_values(&[kind.as_str(), outcome.label()])
            .inc();
        self.governed_operation_duration_seconds
            .with_label_values(&[kind.as_str()])
            .observe(duration_secs);
    }

    /// Record a batch request.
    pub fn record_batch(&self, kind: OperationKind, summary: &BatchSummary) {
        let status = if summary.failed == 0 { "complete" } else { "partial" };
        self.batch_requests_total
            .with_label_values(&[kind.as_str(), status])
            .inc();
    }

    /// Record a cache sweep result.
    pub fn record_cache_sweep(&self, evicted: u64, remaining: usize) {
        self.cache_evictions_total.inc_by(evicted as f64);
        self.cache_entries.set(remaining as f64);
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
)]
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
