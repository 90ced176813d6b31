//! DAMPER Core - Governor Data Types
//!
//! Pure data structures shared by every other crate in the workspace:
//! identities, counter and recency records, documents and mutations,
//! operation outcomes, errors and configuration.

pub mod clock;
pub mod config;
pub mod entities;
pub mod error;
pub mod identity;
pub mod outcome;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AdmissionPolicy, BatchPolicy, CachePolicy, GovernorConfig, OperationConfig, WritePolicy,
    CACHE_TRIM_FRACTION, STORE_BATCH_LIMIT,
};
pub use entities::{
    CounterKey, CounterRecord, CounterSubject, Document, LimitScope, MirrorDocument, Mutation,
    MutationKind, RecencyKey, RecencyMarker,
};
pub use error::{
    ConfigError, DamperError, DamperResult, StorageError, UpstreamError, ValidationError,
};
pub use identity::{
    age_between, new_invocation_id, EntityRef, InvocationId, OperationKind, TenantId, Timestamp,
};
pub use outcome::{
    BatchOutcome, BatchSummary, CachedPayload, EntityOutcome, GovernedOutcome, OperationSummary,
    Projection,
};
