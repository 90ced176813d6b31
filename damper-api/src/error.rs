//! Error Types for DAMPER API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! Admission rejections (rate limited, sampled, loop detected) are NOT
//! errors; they travel in a normal `GovernedResponse`. Only malformed input
//! and infrastructure failures end up here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use damper_core::{DamperError, StorageError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors (401)
    // ========================================================================
    /// Request lacks a valid API key
    Unauthorized,

    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Request body could not be parsed
    InvalidInput,

    /// Required field is missing from request
    MissingField,

    /// Collection size is out of the accepted range
    InvalidRange,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Unknown governed operation in the request path
    OperationNotFound,

    // ========================================================================
    // Timeout Errors (408)
    // ========================================================================
    /// The request did not finish within the configured timeout
    RequestTimeout,

    // ========================================================================
    // Server Errors (500, 502, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Counter, marker or document storage failed
    StorageError,

    /// The upstream source could not be read
    UpstreamError,

    /// Service is temporarily unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,

            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingField
            | ErrorCode::InvalidRange => StatusCode::BAD_REQUEST,

            ErrorCode::OperationNotFound => StatusCode::NOT_FOUND,

            ErrorCode::RequestTimeout => StatusCode::REQUEST_TIMEOUT,

            ErrorCode::UpstreamError => StatusCode::BAD_GATEWAY,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError | ErrorCode::StorageError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::InvalidRange => "Value is out of valid range",
            ErrorCode::OperationNotFound => "Unknown governed operation",
            ErrorCode::RequestTimeout => "Request timed out",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::StorageError => "Storage operation failed",
            ErrorCode::UpstreamError => "Upstream source unavailable",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (offending field, limits)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create a MissingField error.
    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
        .with_details(serde_json::json!({ "field": field }))
    }

    /// Create an InvalidRange error carrying the fixed range message.
    pub fn invalid_range(field: &str, message: impl Into<String>, max: usize, got: usize) -> Self {
        Self::new(ErrorCode::InvalidRange, message).with_details(serde_json::json!({
            "field": field,
            "min": 1,
            "max": max,
            "got": got,
        }))
    }

    pub fn operation_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::OperationNotFound, message)
    }

    pub fn request_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RequestTimeout, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn storage_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorageError, message)
    }

    pub fn upstream_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UpstreamError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let message = err.to_string();
        match err {
            ValidationError::RequiredFieldMissing { field } => ApiError::missing_field(&field),
            ValidationError::InvalidValue { field, .. } => ApiError::validation_failed(message)
                .with_details(serde_json::json!({ "field": field })),
            ValidationError::BatchSizeOutOfRange { field, max, got } => {
                ApiError::invalid_range(&field, message, max, got)
            }
        }
    }
}

/// Convert from DamperError to ApiError.
impl From<DamperError> for ApiError {
    fn from(err: DamperError) -> Self {
        match err {
            DamperError::Validation(e) => e.into(),
            DamperError::Storage(e) => {
                tracing::error!(error = %e, "Storage error");
                match e {
                    StorageError::LockPoisoned => {
                        ApiError::service_unavailable("Storage temporarily unavailable")
                    }
                    _ => ApiError::storage_error("Storage operation failed"),
                }
            }
            DamperError::Upstream(e) => {
                tracing::error!(error = %e, "Upstream error");
                ApiError::upstream_error(e.to_string())
            }
            DamperError::Config(e) => {
                tracing::error!(error = %e, "Configuration error");
                ApiError::internal_error(e.to_string())
            }
        }
    }
}

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use damper_core::{ConfigError, UpstreamError};

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::ValidationFailed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::InvalidRange.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::OperationNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::RequestTimeout.status_code(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(ErrorCode::UpstreamError.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(ErrorCode::StorageError.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_batch_size_error_keeps_fixed_message() {
        let err: ApiError = DamperError::from(ValidationError::BatchSizeOutOfRange {
            field: "entityIds".to_string(),
            max: 50,
            got: 51,
        })
        .into();

        assert_eq!(err.code, ErrorCode::InvalidRange);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "entityIds must contain between 1 and 50 entries");
        let details = err.details.unwrap_or_default();
        assert_eq!(details["got"], 51);
        assert_eq!(details["max"], 50);
    }

    #[test]
    fn test_missing_field_conversion() {
        let err: ApiError = ValidationError::RequiredFieldMissing {
            field: "tenantId".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::MissingField);
        assert!(err.message.contains("tenantId"));
    }

    #[test]
    fn test_infrastructure_errors_do_not_leak_details() {
        let err: ApiError = DamperError::from(StorageError::TransactionFailed {
            reason: "mdb_put: MDB_MAP_FULL".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::StorageError);
        assert!(!err.message.contains("MDB_MAP_FULL"));

        let err: ApiError = DamperError::from(UpstreamError::FetchFailed {
            source_name: "users".to_string(),
            reason: "timeout".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::UpstreamError);

        let err: ApiError = DamperError::from(ConfigError::MissingRequired {
            field: "port".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::InternalError);
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::unauthorized("Invalid API key");
        let json = serde_json::to_string(&err)?;

        assert!(json.contains("UNAUTHORIZED"));
        assert!(!json.contains("details"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }
}
