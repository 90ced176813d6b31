//! Company snapshot projection for deal fanout.

use damper_core::{Document, Projection};
use serde_json::Map;

use super::{copy_allowed, Projector};

/// Company fields denormalized onto every dependent deal.
pub const SNAPSHOT_FIELDS: &[&str] = &[
    "name", "logoUrl", "industry", "website", "city", "state", "size",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotProjector;

impl Projector for SnapshotProjector {
    fn project(&self, source: &Document) -> Projection {
        if source.get_str("name").is_none() {
            return Projection::invalid("company has no name");
        }
        let mut fields = Map::new();
        copy_allowed(source, SNAPSHOT_FIELDS, &mut fields);
        Projection::derived(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_keeps_only_allow_listed_non_null_fields() {
        let company = Document::from_value(
            "c1",
            json!({
                "name": "Acme",
                "industry": "Staffing",
                "website": null,
                "revenue": 1_000_000,
                "size": 250
            }),
        );

        let projection = SnapshotProjector.project(&company);
        assert_eq!(
            projection.fields().cloned(),
            json!({"name": "Acme", "industry": "Staffing", "size": 250})
                .as_object()
                .cloned()
        );
    }

    #[test]
    fn test_snapshot_without_name_is_invalid() {
        let company = Document::from_value("c1", json!({"name": "  ", "industry": "Staffing"}));
        assert!(SnapshotProjector.project(&company).is_invalid());
    }

    #[test]
    fn test_snapshot_is_deterministic() {
        let company = Document::from_value("c1", json!({"name": "Acme", "city": "Austin"}));
        assert_eq!(
            SnapshotProjector.project(&company),
            SnapshotProjector.project(&company)
        );
    }
}
