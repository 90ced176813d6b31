//! User integration status projection.

use damper_core::{Document, Projection};
use serde_json::Map;

use super::{copy_allowed, Projector};

pub const STATUS_FIELDS: &[&str] = &[
    "emailConnected",
    "calendarConnected",
    "syncState",
    "lastSyncAt",
    "grantStatus",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusProjector;

impl Projector for StatusProjector {
    fn project(&self, source: &Document) -> Projection {
        let mut fields = Map::new();
        copy_allowed(source, STATUS_FIELDS, &mut fields);
        if fields.is_empty() {
            return Projection::invalid("user has no integration status");
        }
        Projection::derived(fields)
    }
}
