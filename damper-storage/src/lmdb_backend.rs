//! LMDB-backed counter and recency storage.
//!
//! Uses the heed crate (Rust bindings for LMDB). Every process that opens
//! the same environment path shares the same counters and markers.
//!
//! # Atomicity
//!
//! LMDB serializes write transactions. `try_acquire` and `claim` read and
//! write inside a single write transaction, so the compare and the update
//! cannot interleave with another caller.
//!
//! # Layout
//!
//! Two named databases:
//! - `counters`: encoded `CounterKey` → JSON `CounterRecord`
//! - `recency`: encoded `RecencyKey` → JSON `RecencyMarker`

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use damper_core::{
    CounterKey, CounterRecord, CounterSubject, DamperError, DamperResult, OperationKind,
    RecencyKey, RecencyMarker, StorageError, Timestamp,
};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use serde::{de::DeserializeOwned, Serialize};

use crate::counter::{Acquisition, CounterLimit, CounterStore};
use crate::recency::{RecencyClaim, RecencyStore};

const COUNTERS_DB: &str = "counters";
const RECENCY_DB: &str = "recency";

const SUBJECT_GLOBAL: u8 = 0x00;
const SUBJECT_ENTITY: u8 = 0x01;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for DamperError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Serialization(reason) => {
                DamperError::Storage(StorageError::Serialization { reason })
            }
            other => DamperError::Storage(StorageError::TransactionFailed {
                reason: other.to_string(),
            }),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// Durable `CounterStore` + `RecencyStore` on a shared LMDB environment.
pub struct LmdbGovernorStore {
    env: Env,
    counters: Database<Bytes, Bytes>,
    recency: Database<Bytes, Bytes>,
}

impl LmdbGovernorStore {
    /// Open (or create) the store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the memory map in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let counters: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(COUNTERS_DB))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let recency: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(RECENCY_DB))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            counters,
            recency,
        })
    }

    fn read<T: DeserializeOwned>(
        &self,
        db: Database<Bytes, Bytes>,
        txn: &RoTxn<'_>,
        key: &[u8],
    ) -> Result<Option<T>, LmdbStoreError> {
        match db.get(txn, key).map_err(txn_err)? {
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| LmdbStoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(
        &self,
        db: Database<Bytes, Bytes>,
        txn: &mut RwTxn<'_>,
        key: &[u8],
        value: &T,
    ) -> Result<(), LmdbStoreError> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;
        db.put(txn, key, &bytes).map_err(txn_err)
    }

    fn bump_counter(
        &self,
        txn: &mut RwTxn<'_>,
        key: &CounterKey,
        now: Timestamp,
    ) -> Result<u32, LmdbStoreError> {
        let encoded = encode_counter_key(key);
        let mut record: CounterRecord = self
            .read(self.counters, txn, &encoded)?
            .unwrap_or_else(|| CounterRecord::empty(key.clone(), now));
        record.count = record.count.saturating_add(1);
        record.updated_at = now;
        self.write(self.counters, txn, &encoded, &record)?;
        Ok(record.count)
    }
}

#[async_trait]
impl CounterStore for LmdbGovernorStore {
    async fn get(&self, key: &CounterKey) -> DamperResult<Option<CounterRecord>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self.read(self.counters, &rtxn, &encode_counter_key(key))?)
    }

    async fn increment(&self, key: &CounterKey, now: Timestamp) -> DamperResult<u32> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let count = self.bump_counter(&mut wtxn, key, now)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(count)
    }

    async fn try_acquire(
        &self,
        limits: &[CounterLimit],
        now: Timestamp,
    ) -> DamperResult<Acquisition> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        for limit in limits {
            let record: Option<CounterRecord> =
                self.read(self.counters, &wtxn, &encode_counter_key(&limit.key))?;
            let count = record.map(|r| r.count).unwrap_or(0);
            if count >= limit.max {
                // Dropping the transaction aborts it.
                return Ok(Acquisition::Exhausted {
                    key: limit.key.clone(),
                    count,
                });
            }
        }

        let mut counts = Vec::with_capacity(limits.len());
        for limit in limits {
            counts.push(self.bump_counter(&mut wtxn, &limit.key, now)?);
        }
        wtxn.commit().map_err(txn_err)?;

        Ok(Acquisition::Acquired { counts })
    }

    async fn prune_before(&self, scope: OperationKind, window_id: i64) -> DamperResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let closed: Vec<Vec<u8>> = {
            let iter = self.counters.iter(&wtxn).map_err(txn_err)?;
            let mut keys = Vec::new();
            for entry in iter {
                let (key, bytes) = entry.map_err(txn_err)?;
                let Ok(record) = serde_json::from_slice::<CounterRecord>(bytes) else {
                    keys.push(key.to_vec());
                    continue;
                };
                if record.key.scope == scope && record.key.window_id < window_id {
                    keys.push(key.to_vec());
                }
            }
            keys
        };

        let mut deleted = 0u64;
        for key in &closed {
            if self.counters.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;

        Ok(deleted)
    }
}

#[async_trait]
impl RecencyStore for LmdbGovernorStore {
    async fn get(&self, key: &RecencyKey) -> DamperResult<Option<RecencyMarker>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self.read(self.recency, &rtxn, &encode_recency_key(key))?)
    }

    async fn put(&self, marker: RecencyMarker) -> DamperResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.write(
            self.recency,
            &mut wtxn,
            &encode_recency_key(&marker.key),
            &marker,
        )?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn record_hit(
        &self,
        key: &RecencyKey,
        now: Timestamp,
    ) -> DamperResult<Option<RecencyMarker>> {
        let encoded = encode_recency_key(key);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let existing: Option<RecencyMarker> = self.read(self.recency, &wtxn, &encoded)?;
        let Some(mut marker) = existing.filter(|marker| marker.is_live(now)) else {
            return Ok(None);
        };
        marker.hit_count_in_burst = marker.hit_count_in_burst.saturating_add(1);
        self.write(self.recency, &mut wtxn, &encoded, &marker)?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Some(marker))
    }

    async fn claim(
        &self,
        key: &RecencyKey,
        now: Timestamp,
        ttl: Duration,
    ) -> DamperResult<RecencyClaim> {
        let encoded = encode_recency_key(key);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let existing: Option<RecencyMarker> = self.read(self.recency, &wtxn, &encoded)?;
        let claim = match existing {
            Some(mut marker) if marker.is_live(now) => {
                marker.hit_count_in_burst = marker.hit_count_in_burst.saturating_add(1);
                self.write(self.recency, &mut wtxn, &encoded, &marker)?;
                RecencyClaim::Suppressed(marker)
            }
            _ => {
                let marker = RecencyMarker::new(key.clone(), now, ttl);
                self.write(self.recency, &mut wtxn, &encoded, &marker)?;
                RecencyClaim::Claimed(marker)
            }
        };

        wtxn.commit().map_err(txn_err)?;
        Ok(claim)
    }

    async fn prune_expired(&self, now: Timestamp) -> DamperResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let expired: Vec<Vec<u8>> = {
            let iter = self.recency.iter(&wtxn).map_err(txn_err)?;
            let mut keys = Vec::new();
            for entry in iter {
                let (key, bytes) = entry.map_err(txn_err)?;
                // Undecodable markers are garbage as well.
                let live = serde_json::from_slice::<RecencyMarker>(bytes)
                    .map(|marker| marker.is_live(now))
                    .unwrap_or(false);
                if !live {
                    keys.push(key.to_vec());
                }
            }
            keys
        };

        let mut deleted = 0u64;
        for key in &expired {
            if self.recency.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;

        Ok(deleted)
    }
}

// ============================================================================
// KEY ENCODING
// ============================================================================

/// Append a length-prefixed string component.
fn push_component(buf: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// Format: [scope][subject tag][tenant][entity][window_id: i64 BE]
fn encode_counter_key(key: &CounterKey) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    push_component(&mut buf, key.scope.as_str());
    match &key.subject {
        CounterSubject::Global => buf.push(SUBJECT_GLOBAL),
        CounterSubject::Entity(entity) => {
            buf.push(SUBJECT_ENTITY);
            push_component(&mut buf, &entity.tenant_id);
            push_component(&mut buf, &entity.entity_id);
        }
    }
    buf.extend_from_slice(&key.window_id.to_be_bytes());
    buf
}

/// Format: [scope][tenant][entity]
fn encode_recency_key(key: &RecencyKey) -> Vec<u8> {
    let mut buf = Vec::with_capacity(48);
    push_component(&mut buf, key.scope.as_str());
    push_component(&mut buf, &key.entity.tenant_id);
    push_component(&mut buf, &key.entity.entity_id);
    buf
}
