//! Bounded batch writer.
//!
//! Splits a mutation list into chunks no larger than the store's batch
//! limit and commits them with capped parallelism. Each chunk is atomic on
//! its own; a failed chunk does not roll back chunks already committed.

use std::sync::Arc;

use damper_core::{DamperError, Mutation, WritePolicy, STORE_BATCH_LIMIT};
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::document::DocumentStore;

/// A chunk whose commit failed.
#[derive(Debug)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub mutation_count: usize,
    pub error: DamperError,
}

/// Outcome of `BoundedBatchWriter::apply_all`.
#[derive(Debug, Default)]
pub struct BatchWriteReport {
    pub chunks_total: usize,
    pub chunks_committed: usize,
    /// Mutations in committed chunks.
    pub mutations_applied: usize,
    pub failures: Vec<ChunkFailure>,
}

impl BatchWriteReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn mutations_failed(&self) -> usize {
        self.failures.iter().map(|f| f.mutation_count).sum()
    }
}

/// Writes mutation lists in bounded, rate-paced chunks.
#[derive(Clone)]
pub struct BoundedBatchWriter {
    store: Arc<dyn DocumentStore>,
    policy: WritePolicy,
}

impl BoundedBatchWriter {
    pub fn new(store: Arc<dyn DocumentStore>, policy: WritePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &WritePolicy {
        &self.policy
    }

    /// Effective chunk size; never above the store's hard limit or below one.
    pub fn chunk_size(&self) -> usize {
        self.policy.max_batch_size.clamp(1, STORE_BATCH_LIMIT)
    }

    /// Commit every mutation.
    ///
    /// At most `max_concurrency` chunks are in flight at any time, and the
    /// writer pauses for `inter_batch_delay` between consecutive groups.
    pub async fn apply_all(&self, tenant_id: &str, mutations: Vec<Mutation>) -> BatchWriteReport {
        let chunk_size = self.chunk_size();
        let concurrency = self.policy.max_concurrency.max(1);
        let chunks: Vec<Vec<Mutation>> = mutations
            .chunks(chunk_size)
            .map(<[Mutation]>::to_vec)
            .collect();

        let mut report = BatchWriteReport {
            chunks_total: chunks.len(),
            ..Default::default()
        };

        let groups: Vec<&[Vec<Mutation>]> = chunks.chunks(concurrency).collect();
        let group_count = groups.len();

        for (group_index, group) in groups.into_iter().enumerate() {
            let base = group_index * concurrency;
            let commits = group.iter().enumerate().map(|(offset, chunk)| {
                let store = Arc::clone(&self.store);
                async move {
                    let result = store.commit_batch(tenant_id, chunk).await;
                    (base + offset, chunk.len(), result)
                }
            });

            for (chunk_index, mutation_count, result) in join_all(commits).await {
                match result {
                    Ok(()) => {
                        report.chunks_committed += 1;
                        report.mutations_applied += mutation_count;
                    }
                    Err(error) => {
                        warn!(
                            tenant_id = %tenant_id,
                            chunk_index,
                            mutation_count,
                            error = %error,
                            "Batch chunk commit failed"
                        );
                        report.failures.push(ChunkFailure {
                            chunk_index,
                            mutation_count,
                            error,
                        });
                    }
                }
            }

            if group_index + 1 < group_count && !self.policy.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.policy.inter_batch_delay).await;
            }
        }

        debug!(
            tenant_id = %tenant_id,
            chunks_total = report.chunks_total,
            chunks_committed = report.chunks_committed,
            mutations_applied = report.mutations_applied,
            "Bounded batch write finished"
        );
        report
    }
}
