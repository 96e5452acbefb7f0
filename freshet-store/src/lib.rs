//! FRESHET Storage - Entity Store, Fact Store, and Refresh Ledger
//!
//! Async storage traits plus two backends: a DashMap-based in-memory store
//! and an LMDB-backed persistent store. The ledger's `try_claim` is the sole
//! exclusivity mechanism in the system - both backends implement it as a
//! single atomic check-and-insert scoped per entity.

pub mod keys;
pub mod lmdb;
pub mod memory;

pub use lmdb::{LmdbStore, LmdbStoreError};
pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use freshet_core::{
    AttemptId, CachedRecord, CompletedRefresh, EntityKey, FilingActivityFact, Period,
    RefreshAttempt, StorageError, Timestamp,
};

// ============================================================================
// CLAIM TYPES
// ============================================================================

/// Possession of an in-flight refresh for one entity.
///
/// Move-only by design: `RefreshLedger::complete` consumes the claim, so a
/// second completion of the same claim is unrepresentable in safe code.
#[derive(Debug, PartialEq, Eq)]
pub struct Claim {
    attempt_id: AttemptId,
    key: EntityKey,
    started_at: Timestamp,
}

impl Claim {
    /// Construct a claim token. Only backends should call this, from inside
    /// their atomic claim operation.
    pub fn new(attempt_id: AttemptId, key: EntityKey, started_at: Timestamp) -> Self {
        Self {
            attempt_id,
            key,
            started_at,
        }
    }

    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }
}

/// Result of a claim attempt.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The caller now owns the refresh for this entity. `reclaimed` carries
    /// the id of an abandoned running attempt that was failed to make room,
    /// so the orchestrator can log the reclaim.
    Claimed {
        claim: Claim,
        reclaimed: Option<AttemptId>,
    },
    /// Another caller's refresh is in flight; serve what is cached.
    AlreadyRunning {
        attempt_id: AttemptId,
        since: Timestamp,
    },
}

/// Terminal outcome reported when completing a claimed refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Success { items_processed: u64 },
    Failed { error: String },
}

// ============================================================================
// STORAGE TRAITS
// ============================================================================

/// Cached payload rows, one per `(entity, period)`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the record for its `(key, period)`. Never duplicates.
    async fn upsert_record(&self, record: &CachedRecord) -> Result<(), StorageError>;

    /// All cached records for an entity, ordered by period key.
    async fn records_for(&self, key: &EntityKey) -> Result<Vec<CachedRecord>, StorageError>;

    /// One record by entity and period.
    async fn record(
        &self,
        key: &EntityKey,
        period: Period,
    ) -> Result<Option<CachedRecord>, StorageError>;
}

/// Raw activity facts, idempotently upserted by natural-key fingerprint.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Upsert facts by fingerprint; returns how many were newly inserted.
    /// Re-running with identical facts inserts nothing.
    async fn upsert_facts(&self, facts: &[FilingActivityFact]) -> Result<u64, StorageError>;

    /// Facts for an entity with `event_date >= cutoff`.
    async fn facts_since(
        &self,
        key: &EntityKey,
        cutoff: NaiveDate,
    ) -> Result<Vec<FilingActivityFact>, StorageError>;
}

/// Append-only log of refresh attempts plus the atomic claim primitive.
#[async_trait]
pub trait RefreshLedger: Send + Sync {
    /// The most recent successful refresh for an entity, if any. Failed
    /// attempts never count.
    async fn last_success(&self, key: &EntityKey)
        -> Result<Option<CompletedRefresh>, StorageError>;

    /// Atomically claim the refresh for an entity.
    ///
    /// If a `running` attempt exists and is younger than `reclaim_after`,
    /// returns `AlreadyRunning`. If it is older, it is marked failed as
    /// abandoned and the claim succeeds with `reclaimed` set. The
    /// check-and-insert is atomic with respect to concurrent callers.
    async fn try_claim(
        &self,
        key: &EntityKey,
        ttl_seconds_used: i64,
        now: Timestamp,
        reclaim_after: Duration,
    ) -> Result<ClaimOutcome, StorageError>;

    /// Transition the claimed attempt to a terminal status.
    ///
    /// Returns `Ok(false)` when the attempt was already terminal (e.g. a
    /// maintenance sweep raced a late completion) - a logged anomaly, never
    /// corruption.
    async fn complete(
        &self,
        claim: Claim,
        outcome: RefreshOutcome,
        now: Timestamp,
    ) -> Result<bool, StorageError>;

    /// The currently running attempt for an entity, if any.
    async fn running_attempt(
        &self,
        key: &EntityKey,
    ) -> Result<Option<RefreshAttempt>, StorageError>;

    /// Most recent attempts for an entity, newest first.
    async fn recent_attempts(
        &self,
        key: &EntityKey,
        limit: usize,
    ) -> Result<Vec<RefreshAttempt>, StorageError>;

    /// Mark running attempts older than `older_than` as failed and return
    /// them. Housekeeping only; the read path relies on `try_claim`'s inline
    /// reclaim.
    async fn sweep_abandoned(
        &self,
        now: Timestamp,
        older_than: Duration,
    ) -> Result<Vec<RefreshAttempt>, StorageError>;

    /// Delete terminal attempts completed before the cutoff; returns the
    /// count removed.
    async fn prune_terminal(&self, before: Timestamp) -> Result<u64, StorageError>;
}

/// Everything the refresh engine needs from persistence.
pub trait FreshetStore: RecordStore + FactStore + RefreshLedger {}

impl<T: RecordStore + FactStore + RefreshLedger> FreshetStore for T {}
