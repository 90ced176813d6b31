//! DAMPER Governor - Admission-Controlled Propagation
//!
//! Wraps each propagation path (company snapshot fanout, location mirror,
//! user status check) in the same pipeline: cache short-circuit, rate
//! limit, sampling, recency guard, then fetch → project → persist.
//!
//! Nothing here fires automatically. Every unit of work is an explicit
//! invocation of a [`GovernedOperation`], alone or in a bounded batch.

pub mod batch;
pub mod governor;
pub mod guard;
pub mod limiter;
pub mod operation;
pub mod projector;
pub mod sampler;
pub mod target;

pub use batch::ENTITY_IDS_FIELD;
pub use governor::{collections, Governor};
pub use guard::RecencyGuard;
pub use limiter::{LimitDecision, RateLimiter};
pub use operation::{AdmissionDeps, GovernedOperation, OutcomeCache};
pub use projector::{LocationProjector, Projector, SnapshotProjector, StatusProjector};
pub use sampler::{FixedSampler, RandomSampler, Sampler, SeededSampler};
pub use target::{FanoutTarget, MirrorTarget, PersistenceTarget};
