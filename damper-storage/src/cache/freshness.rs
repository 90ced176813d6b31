//! Freshness classification for cached entries.
//!
//! An entry is served normally while younger than the freshness window,
//! served flagged as stale until the hard cap, and ignored after that.

use damper_core::{age_between, CachePolicy, Timestamp};
use std::time::Duration;

/// Result of looking up a key in the freshness cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<V> {
    /// Younger than the freshness window.
    Fresh { value: V, age: Duration },
    /// Past the freshness window but within the hard cap. Callers must
    /// surface the value as stale.
    HardCapped { value: V, age: Duration },
    /// Present but older than the hard cap. Treated as a miss.
    Expired { age: Duration },
    /// No entry.
    Miss,
}

impl<V> CacheLookup<V> {
    /// The usable value, if any, with its staleness flag.
    pub fn into_value(self) -> Option<(V, bool)> {
        match self {
            CacheLookup::Fresh { value, .. } => Some((value, false)),
            CacheLookup::HardCapped { value, .. } => Some((value, true)),
            CacheLookup::Expired { .. } | CacheLookup::Miss => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Fresh { .. } | CacheLookup::HardCapped { .. })
    }
}

/// Where an entry written at `written_at` sits relative to the policy windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Freshness {
    Fresh,
    HardCapped,
    Expired,
}

pub(crate) fn classify(
    policy: &CachePolicy,
    written_at: Timestamp,
    now: Timestamp,
) -> (Freshness, Duration) {
    let age = age_between(written_at, now);
    let freshness = if age < policy.freshness_window {
        Freshness::Fresh
    } else if age < policy.hard_cap_window {
        Freshness::HardCapped
    } else {
        Freshness::Expired
    };
    (freshness, age)
}
