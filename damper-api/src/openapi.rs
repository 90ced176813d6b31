//! OpenAPI Specification for DAMPER API
//!
//! Generated with utoipa from the route annotations and response types.

use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error::{ApiError, ErrorCode};
use crate::routes::{governed, health};
use crate::telemetry::metrics;
use crate::types::{
    GovernedBatchRequest, GovernedBatchResponse, GovernedBatchSummary, GovernedRequest,
    GovernedResponse,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "DAMPER API",
        version = "0.1.0",
        description = "Admission-controlled update propagation for multi-tenant CRM data",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    tags(
        (name = "Governed", description = "Rate-limited, sampled and loop-guarded propagation"),
        (name = "Health", description = "Liveness and readiness checks"),
        (name = "Observability", description = "Prometheus metrics")
    ),
    paths(
        governed::invoke_governed,
        governed::invoke_governed_batch,
        health::ping,
        health::liveness,
        health::readiness,
        metrics::metrics_handler,
    ),
    components(schemas(
        ApiError,
        ErrorCode,
        GovernedRequest,
        GovernedResponse,
        GovernedBatchRequest,
        GovernedBatchResponse,
        GovernedBatchSummary,
        health::HealthResponse,
        health::HealthStatus,
        health::HealthDetails,
    )),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Security scheme modifier for OpenAPI document.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-API-Key"))),
            );
        }
    }
}
