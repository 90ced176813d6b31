//! Governor-owned records and document-store shapes

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

use crate::identity::{age_between, EntityRef, OperationKind, Timestamp};

// ============================================================================
// RATE LIMIT COUNTERS
// ============================================================================

/// Which ceiling a counter enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    Global,
    Entity,
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitScope::Global => f.write_str("global"),
            LimitScope::Entity => f.write_str("entity"),
        }
    }
}

/// Subject a counter is kept for: the whole system, or one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterSubject {
    Global,
    Entity(EntityRef),
}

impl CounterSubject {
    pub fn limit_scope(&self) -> LimitScope {
        match self {
            CounterSubject::Global => LimitScope::Global,
            CounterSubject::Entity(_) => LimitScope::Entity,
        }
    }
}

impl fmt::Display for CounterSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterSubject::Global => f.write_str("global"),
            CounterSubject::Entity(entity) => write!(f, "{}", entity),
        }
    }
}

/// Identity of one counter record: (scope, subject, window).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CounterKey {
    pub scope: OperationKind,
    pub subject: CounterSubject,
    pub window_id: i64,
}

impl CounterKey {
    pub fn new(scope: OperationKind, subject: CounterSubject, window_id: i64) -> Self {
        Self {
            scope,
            subject,
            window_id,
        }
    }

    /// Fixed, non-sliding window index: `floor(now / window)`.
    pub fn window_id_at(now: Timestamp, window: Duration) -> i64 {
        let window_ms = window.as_millis().max(1) as i64;
        now.timestamp_millis().div_euclid(window_ms)
    }
}

/// Count of admitted calls for one (scope, subject, window).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    pub key: CounterKey,
    pub count: u32,
    pub updated_at: Timestamp,
}

impl CounterRecord {
    /// Implicit zero record for a window that has seen no admissions.
    pub fn empty(key: CounterKey, now: Timestamp) -> Self {
        Self {
            key,
            count: 0,
            updated_at: now,
        }
    }
}

// ============================================================================
// RECENCY MARKERS
// ============================================================================

/// Identity of one recency marker: (scope, entity).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecencyKey {
    pub scope: OperationKind,
    pub entity: EntityRef,
}

impl RecencyKey {
    pub fn new(scope: OperationKind, entity: EntityRef) -> Self {
        Self { scope, entity }
    }
}

/// Marker written before an entity is processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecencyMarker {
    pub key: RecencyKey,
    pub last_seen_at: Timestamp,
    pub ttl: Duration,
    /// Suppressed attempts observed while this marker was live.
    pub hit_count_in_burst: u32,
}

impl RecencyMarker {
    pub fn new(key: RecencyKey, now: Timestamp, ttl: Duration) -> Self {
        Self {
            key,
            last_seen_at: now,
            ttl,
            hit_count_in_burst: 0,
        }
    }

    /// A marker older than its TTL is treated as absent.
    pub fn is_live(&self, now: Timestamp) -> bool {
        age_between(self.last_seen_at, now) < self.ttl
    }
}

// ============================================================================
// DOCUMENTS
// ============================================================================

/// A schemaless document as held by the upstream document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build from a JSON object literal; non-object values yield an empty document.
    pub fn from_value(id: impl Into<String>, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(id, fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    /// Non-blank string field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Write applied to a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationKind {
    /// Replace the whole document.
    Set { fields: Map<String, Value> },
    /// Merge fields into an existing document; fails if it is missing.
    Merge { fields: Map<String, Value> },
    /// Remove the named fields from an existing document.
    RemoveFields { fields: Vec<String> },
    /// Delete the document. Deleting a missing document is not an error.
    Delete,
}

/// A mutation addressed to one document of one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub collection: String,
    pub document_id: String,
    pub kind: MutationKind,
}

impl Mutation {
    pub fn set(collection: &str, document_id: &str, fields: Map<String, Value>) -> Self {
        Self::new(collection, document_id, MutationKind::Set { fields })
    }

    pub fn merge(collection: &str, document_id: &str, fields: Map<String, Value>) -> Self {
        Self::new(collection, document_id, MutationKind::Merge { fields })
    }

    pub fn remove_fields(collection: &str, document_id: &str, fields: Vec<String>) -> Self {
        Self::new(collection, document_id, MutationKind::RemoveFields { fields })
    }

    pub fn delete(collection: &str, document_id: &str) -> Self {
        Self::new(collection, document_id, MutationKind::Delete)
    }

    fn new(collection: &str, document_id: &str, kind: MutationKind) -> Self {
        Self {
            collection: collection.to_string(),
            document_id: document_id.to_string(),
            kind,
        }
    }
}

// ============================================================================
// MIRROR DOCUMENTS
// ============================================================================

/// Derived, denormalized copy of a source entity.
///
/// Existence is meaningful: a mirror is present only while its source
/// projects to valid derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorDocument {
    pub source_id: String,
    pub derived_fields: Map<String, Value>,
    pub processed_by: String,
    pub processed_at: Timestamp,
}

impl MirrorDocument {
    /// Field layout written to the mirror collection.
    pub fn into_fields(self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("sourceId".to_string(), Value::String(self.source_id));
        fields.insert(
            "derivedFields".to_string(),
            Value::Object(self.derived_fields),
        );
        fields.insert("processedBy".to_string(), Value::String(self.processed_by));
        fields.insert(
            "processedAt".to_string(),
            Value::String(self.processed_at.to_rfc3339()),
        );
        fields
    }

    /// Parse a stored mirror document; `None` if the layout does not match.
    pub fn from_document(doc: &Document) -> Option<Self> {
        serde_json::from_value(Value::Object(doc.fields.clone())).ok()
    }
}
