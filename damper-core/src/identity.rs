//! Identity and time types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ValidationError;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Tenant identifier as issued by the document store.
pub type TenantId = String;

/// Identifier attached to a single governed invocation (UUIDv7, sortable).
pub type InvocationId = Uuid;

/// Generate a new invocation id.
pub fn new_invocation_id() -> InvocationId {
    Uuid::now_v7()
}

/// Elapsed time between two timestamps, clamped at zero.
///
/// Clock skew between instances can put `earlier` in the future; such
/// records are treated as brand new rather than failing the caller.
pub fn age_between(earlier: Timestamp, now: Timestamp) -> Duration {
    (now - earlier).to_std().unwrap_or(Duration::ZERO)
}

/// Reference to a tenant-owned entity in the document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub tenant_id: TenantId,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(tenant_id: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            entity_id: entity_id.into(),
        }
    }

    /// Reject blank tenant or entity identifiers.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tenant_id.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "tenantId".to_string(),
            });
        }
        if self.entity_id.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "entityId".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.entity_id)
    }
}

// ============================================================================
// OPERATION KINDS
// ============================================================================

/// The three governed propagation paths.
///
/// Each kind is its own rate-limit scope; counters and recency markers
/// of different kinds never interact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Company change fanned out to denormalized snapshots on its deals.
    SnapshotFanout,
    /// Location change projected onto its mirror document.
    MirrorUpdate,
    /// Cache-backed read of a user's integration status.
    StatusCheck,
}

impl OperationKind {
    pub const ALL: [OperationKind; 3] = [
        OperationKind::SnapshotFanout,
        OperationKind::MirrorUpdate,
        OperationKind::StatusCheck,
    ];

    /// Path segment and rate-limit scope name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::SnapshotFanout => "snapshot-fanout",
            OperationKind::MirrorUpdate => "mirror-update",
            OperationKind::StatusCheck => "status-check",
        }
    }

    /// Infix used for `DAMPER_<KIND>_*` environment variables.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            OperationKind::SnapshotFanout => "SNAPSHOT_FANOUT",
            OperationKind::MirrorUpdate => "MIRROR_UPDATE",
            OperationKind::StatusCheck => "STATUS_CHECK",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "operation".to_string(),
                reason: format!(
                    "expected one of snapshot-fanout, mirror-update, status-check; got '{}'",
                    s
                ),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_operation_kind_round_trips_through_str() {
        for kind in OperationKind::ALL {
            assert_eq!(kind.as_str().parse::<OperationKind>(), Ok(kind));
        }
        assert!("fanout".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_operation_kind_serde_matches_path_segment() -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(&OperationKind::MirrorUpdate)?;
        assert_eq!(json, "\"mirror-update\"");
        Ok(())
    }

    #[test]
    fn test_entity_ref_validation() {
        assert!(EntityRef::new("t1", "loc-1").validate().is_ok());
        assert!(matches!(
            EntityRef::new(" ", "loc-1").validate(),
            Err(ValidationError::RequiredFieldMissing { field }) if field == "tenantId"
        ));
        assert!(EntityRef::new("t1", "").validate().is_err());
    }

    #[test]
    fn test_age_between_clamps_future_timestamps() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let later = now + chrono::Duration::seconds(30);
        assert_eq!(age_between(later, now), Duration::ZERO);
        assert_eq!(age_between(now, later), Duration::from_secs(30));
    }
}
