//! Persisted record types: cached payloads, activity facts, refresh attempts

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;
use crate::identity::{AttemptId, EntityKey, Period, Timestamp, new_attempt_id};

// ============================================================================
// CACHED RECORD
// ============================================================================

/// One cached payload for an entity and time partition.
///
/// The payload is the fetcher-produced, domain-specific JSON document (score
/// summaries, calendar entries, feed items); the core never interprets it.
/// At most one record exists per `(key, period)` - upserts replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    pub key: EntityKey,
    pub period: Period,
    pub payload: serde_json::Value,
    /// Number of underlying items the payload summarizes.
    pub item_count: u64,
    pub updated_at: Timestamp,
}

// ============================================================================
// ACTIVITY FACT
// ============================================================================

/// One raw activity event underlying an entity's signals (a single filing,
/// disclosure, or award row). Immutable once written; upserts are keyed by
/// the natural-key fingerprint so re-ingesting identical results is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingActivityFact {
    pub key: EntityKey,
    /// Upstream document identifier (e.g. SEC accession number).
    pub accession: String,
    /// The acting participant (insider name, registrant, awarding agency).
    pub participant: String,
    pub event_date: NaiveDate,
    pub attributes: serde_json::Value,
    pub recorded_at: Timestamp,
}

impl FilingActivityFact {
    /// SHA-256 fingerprint over the natural key
    /// (domain, entity, accession, participant, event_date).
    ///
    /// Two facts describing the same upstream event always fingerprint
    /// identically regardless of `attributes` or `recorded_at`.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.key.storage_token().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.accession.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.participant.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.event_date.to_string().as_bytes());
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    }

    /// Hex form of the fingerprint, used in storage keys.
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint())
    }
}

// ============================================================================
// REFRESH ATTEMPT
// ============================================================================

/// Lifecycle status of a refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefreshStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl RefreshStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            RefreshStatus::Pending => "pending",
            RefreshStatus::Running => "running",
            RefreshStatus::Success => "success",
            RefreshStatus::Failed => "failed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, RefreshStatusParseError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(RefreshStatus::Pending),
            "running" => Ok(RefreshStatus::Running),
            "success" => Ok(RefreshStatus::Success),
            "failed" | "failure" => Ok(RefreshStatus::Failed),
            _ => Err(RefreshStatusParseError(s.to_string())),
        }
    }

    /// An attempt in a terminal status never transitions again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RefreshStatus::Success | RefreshStatus::Failed)
    }
}

impl fmt::Display for RefreshStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for RefreshStatus {
    type Err = RefreshStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid refresh status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshStatusParseError(pub String);

impl fmt::Display for RefreshStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid refresh status: {}", self.0)
    }
}

impl std::error::Error for RefreshStatusParseError {}

impl From<RefreshStatusParseError> for ValidationError {
    fn from(err: RefreshStatusParseError) -> Self {
        ValidationError::UnknownStatus { token: err.0 }
    }
}

/// One refresh attempt row in the ledger.
///
/// Invariant: per entity, at most one attempt is `Running` at any instant.
/// The ledger's claim operation is the sole writer that creates these rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshAttempt {
    pub attempt_id: AttemptId,
    pub key: EntityKey,
    pub status: RefreshStatus,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub items_processed: u64,
    /// The TTL the freshness decision was using when this refresh was claimed.
    pub ttl_seconds_used: i64,
    pub error: Option<String>,
}

impl RefreshAttempt {
    /// Create a new attempt in `Running` status, claimed at `now`.
    pub fn begin(key: EntityKey, ttl_seconds_used: i64, now: Timestamp) -> Self {
        Self {
            attempt_id: new_attempt_id(),
            key,
            status: RefreshStatus::Running,
            started_at: now,
            completed_at: None,
            items_processed: 0,
            ttl_seconds_used,
            error: None,
        }
    }

    /// Age of this attempt as of `now`. Zero if the clock ran backwards.
    pub fn age(&self, now: Timestamp) -> std::time::Duration {
        now.signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

/// The surviving summary of the most recent successful refresh, used by the
/// freshness decision. Failed attempts never produce one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedRefresh {
    pub completed_at: Timestamp,
    pub items_processed: u64,
    pub ttl_seconds_used: i64,
}

// =============================================================================
// TESTS
// =============================================================================
