//! LMDB-backed persistent store.
//!
//! Uses the heed crate (Rust bindings for LMDB) with a single unnamed
//! database holding all row types behind the string key scheme in
//! [`crate::keys`]. Values are JSON.
//!
//! # Claim atomicity
//!
//! LMDB allows one write transaction at a time, so `try_claim` runs its
//! whole check-and-insert (read the `run:` marker, inspect the running
//! attempt, write the replacement) inside one write transaction. Two
//! concurrent claimers serialize on the transaction and the loser sees the
//! winner's marker.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use freshet_core::{
    CachedRecord, CompletedRefresh, EntityKey, FilingActivityFact, Period, RefreshAttempt,
    RefreshStatus, StorageError, Timestamp,
};

use crate::keys;
use crate::{Claim, ClaimOutcome, FactStore, RecordStore, RefreshLedger, RefreshOutcome};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StorageError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Serialization(reason) | LmdbStoreError::Deserialization(reason) => {
                StorageError::Codec { reason }
            }
            other => StorageError::Backend {
                reason: other.to_string(),
            },
        }
    }
}

/// Persistent store over a memory-mapped LMDB environment.
pub struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbStore {
    /// Open (or create) the store at `path` with the given map size.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    fn read_txn(&self) -> Result<RoTxn<'_>, LmdbStoreError> {
        self.env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))
    }

    fn write_txn(&self) -> Result<RwTxn<'_>, LmdbStoreError> {
        self.env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        txn: &RoTxn<'_>,
        key: &str,
    ) -> Result<Option<T>, LmdbStoreError> {
        match self
            .db
            .get(txn, key.as_bytes())
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?
        {
            Some(bytes) => {
                let value = serde_json::from_slice(bytes)
                    .map_err(|e| LmdbStoreError::Deserialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(
        &self,
        txn: &mut RwTxn<'_>,
        key: &str,
        value: &T,
    ) -> Result<(), LmdbStoreError> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;
        self.db
            .put(txn, key.as_bytes(), &bytes)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))
    }

    /// Deserialize every value under a key prefix, in key order.
    fn scan_prefix<T: DeserializeOwned>(
        &self,
        txn: &RoTxn<'_>,
        prefix: &str,
    ) -> Result<Vec<T>, LmdbStoreError> {
        let iter = self
            .db
            .prefix_iter(txn, prefix.as_bytes())
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut values = Vec::new();
        for result in iter {
            let (_, bytes) = result.map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            values.push(
                serde_json::from_slice(bytes)
                    .map_err(|e| LmdbStoreError::Deserialization(e.to_string()))?,
            );
        }
        Ok(values)
    }

    /// Collect keys under a prefix. Used by the delete paths, which cannot
    /// hold an iterator across their own writes.
    fn scan_prefix_keys(
        &self,
        txn: &RoTxn<'_>,
        prefix: &str,
    ) -> Result<Vec<String>, LmdbStoreError> {
        let iter = self
            .db
            .prefix_iter(txn, prefix.as_bytes())
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut found = Vec::new();
        for result in iter {
            let (key, _) = result.map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            found.push(String::from_utf8_lossy(key).into_owned());
        }
        Ok(found)
    }

    /// The running attempt behind an entity's `run:` marker, if the marker
    /// exists and still points at a `Running` row.
    fn load_running(
        &self,
        txn: &RoTxn<'_>,
        token: &str,
    ) -> Result<Option<RefreshAttempt>, LmdbStoreError> {
        let marker_key = format!("run:{token}");
        let attempt_id = match self
            .db
            .get(txn, marker_key.as_bytes())
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?
        {
            Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            None => return Ok(None),
        };

        let attempt: Option<RefreshAttempt> =
            self.get_json(txn, &format!("att:{token}:{attempt_id}"))?;
        Ok(attempt.filter(|a| a.status == RefreshStatus::Running))
    }
}

#[async_trait]
impl RecordStore for LmdbStore {
    async fn upsert_record(&self, record: &CachedRecord) -> Result<(), StorageError> {
        let mut wtxn = self.write_txn()?;
        self.put_json(&mut wtxn, &keys::record_key(&record.key, record.period), record)?;
        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(())
    }

    async fn records_for(&self, key: &EntityKey) -> Result<Vec<CachedRecord>, StorageError> {
        let rtxn = self.read_txn()?;
        // Period keys sort lexicographically, so prefix order is period order
        Ok(self.scan_prefix(&rtxn, &keys::record_prefix(key))?)
    }

    async fn record(
        &self,
        key: &EntityKey,
        period: Period,
    ) -> Result<Option<CachedRecord>, StorageError> {
        let rtxn = self.read_txn()?;
        Ok(self.get_json(&rtxn, &keys::record_key(key, period))?)
    }
}

#[async_trait]
impl FactStore for LmdbStore {
    async fn upsert_facts(&self, facts: &[FilingActivityFact]) -> Result<u64, StorageError> {
        let mut wtxn = self.write_txn()?;
        let mut inserted = 0u64;
        for fact in facts {
            let key = keys::fact_key(fact);
            let exists = self
                .db
                .get(&wtxn, key.as_bytes())
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?
                .is_some();
            self.put_json(&mut wtxn, &key, fact)?;
            if !exists {
                inserted += 1;
            }
        }
        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(inserted)
    }

    async fn facts_since(
        &self,
        key: &EntityKey,
        cutoff: NaiveDate,
    ) -> Result<Vec<FilingActivityFact>, StorageError> {
        let rtxn = self.read_txn()?;
        let all: Vec<FilingActivityFact> = self.scan_prefix(&rtxn, &keys::fact_prefix(key))?;
        Ok(all
            .into_iter()
            .filter(|fact| fact.event_date >= cutoff)
            .collect())
    }
}

#[async_trait]
impl RefreshLedger for LmdbStore {
    async fn last_success(
        &self,
        key: &EntityKey,
    ) -> Result<Option<CompletedRefresh>, StorageError> {
        let rtxn = self.read_txn()?;
        // UUIDv7 keys scan oldest-first; walk backwards for the latest success
        let attempts: Vec<RefreshAttempt> = self.scan_prefix(&rtxn, &keys::attempt_prefix(key))?;
        Ok(attempts
            .iter()
            .rev()
            .find(|attempt| attempt.status == RefreshStatus::Success)
            .and_then(|attempt| {
                attempt.completed_at.map(|completed_at| CompletedRefresh {
                    completed_at,
                    items_processed: attempt.items_processed,
                    ttl_seconds_used: attempt.ttl_seconds_used,
                })
            }))
    }

    async fn try_claim(
        &self,
        key: &EntityKey,
        ttl_seconds_used: i64,
        now: Timestamp,
        reclaim_after: Duration,
    ) -> Result<ClaimOutcome, StorageError> {
        let token = key.storage_token();
        let mut wtxn = self.write_txn()?;

        let mut reclaimed = None;
        if let Some(mut running) = self.load_running(&wtxn, &token)? {
            if running.age(now) <= reclaim_after {
                return Ok(ClaimOutcome::AlreadyRunning {
                    attempt_id: running.attempt_id,
                    since: running.started_at,
                });
            }
            // Abandoned by a crashed or hung worker; fail it and take over.
            running.status = RefreshStatus::Failed;
            running.completed_at = Some(now);
            running.error = Some("abandoned: reclaim threshold exceeded".to_string());
            self.put_json(
                &mut wtxn,
                &keys::attempt_key(key, running.attempt_id),
                &running,
            )?;
            reclaimed = Some(running.attempt_id);
        }

        let attempt = RefreshAttempt::begin(key.clone(), ttl_seconds_used, now);
        let claim = Claim::new(attempt.attempt_id, key.clone(), attempt.started_at);

        self.put_json(&mut wtxn, &keys::attempt_key(key, attempt.attempt_id), &attempt)?;
        self.db
            .put(
                &mut wtxn,
                keys::running_marker_key(key).as_bytes(),
                attempt.attempt_id.to_string().as_bytes(),
            )
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(ClaimOutcome::Claimed { claim, reclaimed })
    }

    async fn complete(
        &self,
        claim: Claim,
        outcome: RefreshOutcome,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        let attempt_key = keys::attempt_key(claim.key(), claim.attempt_id());
        let mut wtxn = self.write_txn()?;

        let mut attempt: RefreshAttempt = self
            .get_json(&wtxn, &attempt_key)?
            .ok_or(StorageError::AttemptNotFound {
                attempt_id: claim.attempt_id(),
            })?;

        if attempt.status.is_terminal() {
            return Ok(false);
        }

        attempt.completed_at = Some(now);
        match outcome {
            RefreshOutcome::Success { items_processed } => {
                attempt.status = RefreshStatus::Success;
                attempt.items_processed = items_processed;
            }
            RefreshOutcome::Failed { error } => {
                attempt.status = RefreshStatus::Failed;
                attempt.error = Some(error);
            }
        }
        self.put_json(&mut wtxn, &attempt_key, &attempt)?;

        // Drop the marker only if it still points at this attempt; a reclaim
        // may already have handed it to a newer one.
        let marker_key = keys::running_marker_key(claim.key());
        let points_here = self
            .db
            .get(&wtxn, marker_key.as_bytes())
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?
            .map_or(false, |bytes| {
                bytes == claim.attempt_id().to_string().as_bytes()
            });
        if points_here {
            self.db
                .delete(&mut wtxn, marker_key.as_bytes())
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        }

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(true)
    }

    async fn running_attempt(
        &self,
        key: &EntityKey,
    ) -> Result<Option<RefreshAttempt>, StorageError> {
        let rtxn = self.read_txn()?;
        Ok(self.load_running(&rtxn, &key.storage_token())?)
    }

    async fn recent_attempts(
        &self,
        key: &EntityKey,
        limit: usize,
    ) -> Result<Vec<RefreshAttempt>, StorageError> {
        let rtxn = self.read_txn()?;
        let mut attempts: Vec<RefreshAttempt> =
            self.scan_prefix(&rtxn, &keys::attempt_prefix(key))?;
        attempts.reverse();
        attempts.truncate(limit);
        Ok(attempts)
    }

    async fn sweep_abandoned(
        &self,
        now: Timestamp,
        older_than: Duration,
    ) -> Result<Vec<RefreshAttempt>, StorageError> {
        let mut wtxn = self.write_txn()?;
        let markers = self.scan_prefix_keys(&wtxn, keys::ALL_RUNNING_PREFIX)?;

        let mut swept = Vec::new();
        for marker_key in markers {
            let token = &marker_key[keys::ALL_RUNNING_PREFIX.len()..];
            let Some(mut running) = self.load_running(&wtxn, token)? else {
                // Dangling marker with no running row behind it
                self.db
                    .delete(&mut wtxn, marker_key.as_bytes())
                    .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
                continue;
            };
            if running.age(now) <= older_than {
                continue;
            }
            running.status = RefreshStatus::Failed;
            running.completed_at = Some(now);
            running.error = Some("abandoned: swept by maintenance".to_string());
            self.put_json(
                &mut wtxn,
                &format!("att:{token}:{}", running.attempt_id),
                &running,
            )?;
            self.db
                .delete(&mut wtxn, marker_key.as_bytes())
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            swept.push(running);
        }

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(swept)
    }

    async fn prune_terminal(&self, before: Timestamp) -> Result<u64, StorageError> {
        let mut wtxn = self.write_txn()?;
        let attempt_keys = self.scan_prefix_keys(&wtxn, keys::ALL_ATTEMPTS_PREFIX)?;

        let mut pruned = 0u64;
        for attempt_key in attempt_keys {
            let Some(attempt) = self.get_json::<RefreshAttempt>(&wtxn, &attempt_key)? else {
                continue;
            };
            let expired = attempt.status.is_terminal()
                && attempt.completed_at.map_or(false, |at| at < before);
            if !expired {
                continue;
            }
            if self
                .db
                .delete(&mut wtxn, attempt_key.as_bytes())
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?
            {
                pruned += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(pruned)
    }
}

// =============================================================================
// TESTS
// =============================================================================
