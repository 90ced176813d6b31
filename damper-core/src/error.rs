//! Error types for DAMPER operations

use std::time::Duration;
use thiserror::Error;

/// Storage layer errors (document store, counters, markers).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Write failed for {collection}/{id}: {reason}")]
    WriteFailed {
        collection: String,
        id: String,
        reason: String,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors for caller input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// The message is fixed per limit so callers can match on it.
    #[error("{field} must contain between 1 and {max} entries")]
    BatchSizeOutOfRange { field: String, max: usize, got: usize },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Failures of the upstream source an operation reads from.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Fetch from {source_name} failed: {reason}")]
    FetchFailed { source_name: String, reason: String },

    #[error("Fetch from {source_name} timed out after {after:?}")]
    Timeout { source_name: String, after: Duration },
}

/// Master error type for all DAMPER errors.
#[derive(Debug, Clone, Error)]
pub enum DamperError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Result type alias for DAMPER operations.
pub type DamperResult<T> = Result<T, DamperError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            collection: "locations".to_string(),
            id: "loc-1".to_string(),
        };
        assert_eq!(err.to_string(), "Document not found: locations/loc-1");
    }

    #[test]
    fn test_batch_size_message_is_fixed() {
        let over = ValidationError::BatchSizeOutOfRange {
            field: "entityIds".to_string(),
            max: 50,
            got: 51,
        };
        let empty = ValidationError::BatchSizeOutOfRange {
            field: "entityIds".to_string(),
            max: 50,
            got: 0,
        };
        assert_eq!(over.to_string(), "entityIds must contain between 1 and 50 entries");
        assert_eq!(over.to_string(), empty.to_string());
    }

    #[test]
    fn test_damper_error_from_conversions() {
        let err: DamperError = UpstreamError::FetchFailed {
            source_name: "users".to_string(),
            reason: "connection reset".to_string(),
        }
        .into();
        assert!(matches!(err, DamperError::Upstream(_)));
        assert!(err.to_string().contains("connection reset"));

        let err: DamperError = StorageError::LockPoisoned.into();
        assert!(matches!(err, DamperError::Storage(StorageError::LockPoisoned)));
    }
}
