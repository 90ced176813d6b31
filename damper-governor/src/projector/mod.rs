//! Projectors: pure functions from a source document to derived fields.

pub mod location;
pub mod snapshot;
pub mod status;

pub use location::{LocationProjector, StateMatch, StateSource};
pub use snapshot::SnapshotProjector;
pub use status::StatusProjector;

use damper_core::{Document, Projection};
use serde_json::{Map, Value};
use std::fmt::Debug;

/// Computes a dependent aggregate from its source entity.
///
/// Implementations must be deterministic and free of side effects.
pub trait Projector: Send + Sync + Debug {
    fn project(&self, source: &Document) -> Projection;
}

/// Copy allow-listed fields, dropping absent and null values.
pub(crate) fn copy_allowed(source: &Document, allow_list: &[&str], into: &mut Map<String, Value>) {
    for field in allow_list {
        if let Some(value) = source.get(field) {
            into.insert((*field).to_string(), value.clone());
        }
    }
}
