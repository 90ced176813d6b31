//! Freshness cache for repeated reads of the same upstream entity.
//!
//! Staleness is explicit: a lookup reports whether the value is fresh,
//! hard-capped (usable but flagged stale) or expired.

pub mod freshness;
pub mod store;

pub use freshness::CacheLookup;
pub use store::{CacheEntry, CacheStats, FreshnessCache, SweepReport};
