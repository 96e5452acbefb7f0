//! FRESHET Test Utilities
//!
//! Centralized test infrastructure for the Freshet workspace:
//! - A manual clock for driving freshness decisions deterministically
//! - Scripted fetch providers (static, failing, slow, sequenced)
//! - Fixture builders for facts, records, and fetch payloads

// Re-export core types for convenience
pub use freshet_core::{
    ActivitySignals, CachedRecord, Clock, DataDomain, EntityKey, FetchError, FetchPayload,
    FetchProvider, FilingActivityFact, FreshnessDecision, MarketCalendar, MarketSession, Period,
    RefreshAttempt, RefreshStatus, Timestamp, TtlPolicy,
};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// A clock that only moves when told to. Share one `Arc<ManualClock>`
/// between the test and the engine to pin every freshness decision to a
/// known instant.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward (or backward, with a negative duration).
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock().expect("clock lock") = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().expect("clock lock")
    }
}

// ============================================================================
// SCRIPTED FETCH PROVIDERS
// ============================================================================

/// Returns the same payload on every fetch and counts calls.
#[derive(Debug)]
pub struct StaticFetcher {
    payload: FetchPayload,
    calls: AtomicU64,
}

impl StaticFetcher {
    pub fn new(payload: FetchPayload) -> Self {
        Self {
            payload,
            calls: AtomicU64::new(0),
        }
    }

    /// How many fetches have been issued.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchProvider for StaticFetcher {
    async fn fetch(&self, _key: &EntityKey) -> Result<FetchPayload, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.payload.clone())
    }
}

/// Fails every fetch with an upstream error.
#[derive(Debug)]
pub struct FailingFetcher {
    reason: String,
    calls: AtomicU64,
}

impl FailingFetcher {
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchProvider for FailingFetcher {
    async fn fetch(&self, key: &EntityKey) -> Result<FetchPayload, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(FetchError::Upstream {
            key: key.storage_token(),
            reason: self.reason.clone(),
        })
    }
}

/// Sleeps for a fixed delay before returning its payload. For timeout and
/// stale-while-revalidate tests.
#[derive(Debug)]
pub struct SlowFetcher {
    payload: FetchPayload,
    delay: Duration,
    calls: AtomicU64,
}

impl SlowFetcher {
    pub fn new(payload: FetchPayload, delay: Duration) -> Self {
        Self {
            payload,
            delay,
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchProvider for SlowFetcher {
    async fn fetch(&self, _key: &EntityKey) -> Result<FetchPayload, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self.payload.clone())
    }
}

/// Plays back a script of fetch results in order. Fetching past the end of
/// the script fails with an upstream error.
#[derive(Debug)]
pub struct SequenceFetcher {
    script: Mutex<VecDeque<Result<FetchPayload, FetchError>>>,
}

impl SequenceFetcher {
    pub fn new(script: Vec<Result<FetchPayload, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }

    /// Results not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().expect("script lock").len()
    }
}

#[async_trait]
impl FetchProvider for SequenceFetcher {
    async fn fetch(&self, key: &EntityKey) -> Result<FetchPayload, FetchError> {
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(FetchError::Upstream {
                    key: key.storage_token(),
                    reason: "fetch script exhausted".to_string(),
                })
            })
    }
}

// ============================================================================
// FIXTURE BUILDERS
// ============================================================================

/// A filing activity fact for `key` dated `event_date`.
pub fn fact_on(key: &EntityKey, accession: &str, event_date: NaiveDate) -> FilingActivityFact {
    FilingActivityFact {
        key: key.clone(),
        accession: accession.to_string(),
        participant: "J SMITH".to_string(),
        event_date,
        attributes: serde_json::Value::Null,
        recorded_at: chrono::Utc::now(),
    }
}

/// A cached record for `(key, period)` whose `item_count` doubles as a
/// version marker tests can assert on.
pub fn record_with(key: &EntityKey, period: Period, item_count: u64) -> CachedRecord {
    CachedRecord {
        key: key.clone(),
        period,
        payload: serde_json::json!({ "item_count": item_count }),
        item_count,
        updated_at: chrono::Utc::now(),
    }
}

/// A fetch payload carrying one fact and one record for `(key, period)`.
pub fn payload_with(key: &EntityKey, period: Period, item_count: u64) -> FetchPayload {
    let event_date = match period {
        Period::Month { year, month } => NaiveDate::from_ymd_opt(year, month, 15),
        Period::Year { year } => NaiveDate::from_ymd_opt(year, 6, 15),
        Period::Rolling => NaiveDate::from_ymd_opt(2026, 8, 15),
    }
    .unwrap_or_default();

    FetchPayload {
        facts: vec![fact_on(key, &format!("payload-{item_count}"), event_date)],
        records: vec![record_with(key, period, item_count)],
    }
}

// ============================================================================
// TESTS
// ============================================================================
