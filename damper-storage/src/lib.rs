//! DAMPER Storage - Governor Infrastructure
//!
//! Storage-side building blocks of the update propagation governor:
//!
//! - `DocumentStore`: the upstream document database, scoped by tenant
//! - `CounterStore` / `RecencyStore`: durable coordination state shared by
//!   every instance (in-memory and LMDB implementations)
//! - `FreshnessCache`: per-process, best-effort status cache
//! - `BoundedBatchWriter`: chunked, concurrency-capped mutation writer
//! - `SourceFetcher`: where a governed operation reads its source entity

pub mod batch_writer;
pub mod cache;
pub mod counter;
pub mod document;
pub mod fetcher;
pub mod lmdb_backend;
pub mod recency;

pub use batch_writer::{BatchWriteReport, BoundedBatchWriter, ChunkFailure};
pub use cache::{CacheEntry, CacheLookup, CacheStats, FreshnessCache, SweepReport};
pub use counter::{Acquisition, CounterLimit, CounterStore, InMemoryCounterStore};
pub use document::{DocumentStore, InMemoryDocumentStore};
pub use fetcher::{CollectionFetcher, SourceFetcher};
pub use lmdb_backend::{LmdbGovernorStore, LmdbStoreError};
pub use recency::{InMemoryRecencyStore, RecencyClaim, RecencyStore};
