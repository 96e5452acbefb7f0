//! In-memory backend over DashMap.
//!
//! Each map is sharded by entity token. The claim's check-and-insert runs
//! while holding the entity's attempt-list entry, so DashMap's per-shard
//! lock makes it atomic per key without any global lock.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;

use freshet_core::{
    CachedRecord, CompletedRefresh, EntityKey, FilingActivityFact, Period, RefreshAttempt,
    RefreshStatus, StorageError, Timestamp,
};

use crate::{Claim, ClaimOutcome, FactStore, RecordStore, RefreshLedger, RefreshOutcome};

/// DashMap-backed store, the default for tests and single-process embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// entity token -> period key -> record
    records: DashMap<String, BTreeMap<String, CachedRecord>>,
    /// entity token -> fact fingerprint hex -> fact
    facts: DashMap<String, BTreeMap<String, FilingActivityFact>>,
    /// entity token -> attempts, oldest first
    attempts: DashMap<String, Vec<RefreshAttempt>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total attempt rows across all entities (diagnostic).
    pub fn attempt_count(&self) -> usize {
        self.attempts.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_record(&self, record: &CachedRecord) -> Result<(), StorageError> {
        self.records
            .entry(record.key.storage_token())
            .or_default()
            .insert(record.period.storage_key(), record.clone());
        Ok(())
    }

    async fn records_for(&self, key: &EntityKey) -> Result<Vec<CachedRecord>, StorageError> {
        Ok(self
            .records
            .get(&key.storage_token())
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn record(
        &self,
        key: &EntityKey,
        period: Period,
    ) -> Result<Option<CachedRecord>, StorageError> {
        Ok(self
            .records
            .get(&key.storage_token())
            .and_then(|entry| entry.get(&period.storage_key()).cloned()))
    }
}

#[async_trait]
impl FactStore for MemoryStore {
    async fn upsert_facts(&self, facts: &[FilingActivityFact]) -> Result<u64, StorageError> {
        let mut inserted = 0u64;
        for fact in facts {
            let mut entry = self.facts.entry(fact.key.storage_token()).or_default();
            if entry
                .insert(fact.fingerprint_hex(), fact.clone())
                .is_none()
            {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn facts_since(
        &self,
        key: &EntityKey,
        cutoff: NaiveDate,
    ) -> Result<Vec<FilingActivityFact>, StorageError> {
        Ok(self
            .facts
            .get(&key.storage_token())
            .map(|entry| {
                entry
                    .values()
                    .filter(|fact| fact.event_date >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl RefreshLedger for MemoryStore {
    async fn last_success(
        &self,
        key: &EntityKey,
    ) -> Result<Option<CompletedRefresh>, StorageError> {
        Ok(self.attempts.get(&key.storage_token()).and_then(|entry| {
            entry
                .iter()
                .rev()
                .find(|attempt| attempt.status == RefreshStatus::Success)
                .and_then(|attempt| {
                    attempt.completed_at.map(|completed_at| CompletedRefresh {
                        completed_at,
                        items_processed: attempt.items_processed,
                        ttl_seconds_used: attempt.ttl_seconds_used,
                    })
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
        // The entry ref holds the shard lock for this entity's attempt list,
        // making the whole check-and-insert atomic per key.
        let mut entry = self.attempts.entry(key.storage_token()).or_default();

        let mut reclaimed = None;
        if let Some(running) = entry
            .iter_mut()
            .find(|attempt| attempt.status == RefreshStatus::Running)
        {
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
            reclaimed = Some(running.attempt_id);
        }

        let attempt = RefreshAttempt::begin(key.clone(), ttl_seconds_used, now);
        let claim = Claim::new(attempt.attempt_id, key.clone(), attempt.started_at);
        entry.push(attempt);

        Ok(ClaimOutcome::Claimed { claim, reclaimed })
    }

    async fn complete(
        &self,
        claim: Claim,
        outcome: RefreshOutcome,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        let mut entry = self
            .attempts
            .get_mut(&claim.key().storage_token())
            .ok_or(StorageError::AttemptNotFound {
                attempt_id: claim.attempt_id(),
            })?;

        let attempt = entry
            .iter_mut()
            .find(|attempt| attempt.attempt_id == claim.attempt_id())
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
        Ok(true)
    }

    async fn running_attempt(
        &self,
        key: &EntityKey,
    ) -> Result<Option<RefreshAttempt>, StorageError> {
        Ok(self.attempts.get(&key.storage_token()).and_then(|entry| {
            entry
                .iter()
                .find(|attempt| attempt.status == RefreshStatus::Running)
                .cloned()
        }))
    }

    async fn recent_attempts(
        &self,
        key: &EntityKey,
        limit: usize,
    ) -> Result<Vec<RefreshAttempt>, StorageError> {
        Ok(self
            .attempts
            .get(&key.storage_token())
            .map(|entry| entry.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn sweep_abandoned(
        &self,
        now: Timestamp,
        older_than: Duration,
    ) -> Result<Vec<RefreshAttempt>, StorageError> {
        let mut swept = Vec::new();
        for mut entry in self.attempts.iter_mut() {
            for attempt in entry.value_mut().iter_mut() {
                if attempt.status == RefreshStatus::Running && attempt.age(now) > older_than {
                    attempt.status = RefreshStatus::Failed;
                    attempt.completed_at = Some(now);
                    attempt.error = Some("abandoned: swept by maintenance".to_string());
                    swept.push(attempt.clone());
                }
            }
        }
        Ok(swept)
    }

    async fn prune_terminal(&self, before: Timestamp) -> Result<u64, StorageError> {
        let mut pruned = 0u64;
        for mut entry in self.attempts.iter_mut() {
            let attempts = entry.value_mut();
            let original = attempts.len();
            attempts.retain(|attempt| {
                !(attempt.status.is_terminal()
                    && attempt.completed_at.map_or(false, |at| at < before))
            });
            pruned += (original - attempts.len()) as u64;
        }
        Ok(pruned)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use freshet_core::DataDomain;
    use std::sync::Arc;

    fn test_key(entity: &str) -> EntityKey {
        EntityKey::new(DataDomain::InsiderFilings, entity).expect("valid key")
    }

    fn test_record(key: &EntityKey, period: Period, marker: u64) -> CachedRecord {
        CachedRecord {
            key: key.clone(),
            period,
            payload: serde_json::json!({ "marker": marker }),
            item_count: marker,
            updated_at: Utc::now(),
        }
    }

    fn test_fact(key: &EntityKey, accession: &str, date: NaiveDate) -> FilingActivityFact {
        FilingActivityFact {
            key: key.clone(),
            accession: accession.to_string(),
            participant: "J SMITH".to_string(),
            event_date: date,
            attributes: serde_json::Value::Null,
            recorded_at: Utc::now(),
        }
    }

    const MONTH: Period = Period::Month {
        year: 2026,
        month: 8,
    };

    #[tokio::test]
    async fn test_record_upsert_replaces() {
        let store = MemoryStore::new();
        let key = test_key("AAPL");

        store
            .upsert_record(&test_record(&key, MONTH, 1))
            .await
            .expect("upsert should succeed");
        store
            .upsert_record(&test_record(&key, MONTH, 2))
            .await
            .expect("upsert should succeed");

        let records = store.records_for(&key).await.expect("read should succeed");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].item_count, 2);
    }

    #[tokio::test]
    async fn test_records_span_periods() {
        let store = MemoryStore::new();
        let key = test_key("AAPL");

        store
            .upsert_record(&test_record(&key, MONTH, 1))
            .await
            .expect("upsert should succeed");
        store
            .upsert_record(&test_record(
                &key,
                Period::Month {
                    year: 2026,
                    month: 7,
                },
                2,
            ))
            .await
            .expect("upsert should succeed");

        let records = store.records_for(&key).await.expect("read should succeed");
        assert_eq!(records.len(), 2);
        // BTreeMap ordering: July before August
        assert_eq!(records[0].period.storage_key(), "2026-07");

        let one = store
            .record(&key, MONTH)
            .await
            .expect("read should succeed")
            .expect("record should exist");
        assert_eq!(one.item_count, 1);
    }

    #[tokio::test]
    async fn test_fact_upsert_idempotent() {
        let store = MemoryStore::new();
        let key = test_key("AAPL");
        let date = NaiveDate::from_ymd_opt(2026, 8, 20).expect("valid date");
        let facts = vec![
            test_fact(&key, "acc-1", date),
            test_fact(&key, "acc-2", date),
        ];

        let inserted = store.upsert_facts(&facts).await.expect("upsert");
        assert_eq!(inserted, 2);

        // Identical batch inserts nothing new
        let inserted = store.upsert_facts(&facts).await.expect("upsert");
        assert_eq!(inserted, 0);

        let all = store
            .facts_since(&key, NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid date"))
            .await
            .expect("read");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_facts_since_filters_by_date() {
        let store = MemoryStore::new();
        let key = test_key("AAPL");
        let old = NaiveDate::from_ymd_opt(2026, 5, 1).expect("valid date");
        let recent = NaiveDate::from_ymd_opt(2026, 8, 20).expect("valid date");
        store
            .upsert_facts(&[test_fact(&key, "a", old), test_fact(&key, "b", recent)])
            .await
            .expect("upsert");

        let cutoff = NaiveDate::from_ymd_opt(2026, 8, 1).expect("valid date");
        let facts = store.facts_since(&key, cutoff).await.expect("read");
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].accession, "b");
    }

    #[tokio::test]
    async fn test_claim_then_already_running() {
        let store = MemoryStore::new();
        let key = test_key("AAPL");
        let now = Utc::now();
        let reclaim = Duration::from_secs(180);

        let first = store
            .try_claim(&key, 7200, now, reclaim)
            .await
            .expect("claim");
        let claim = match first {
            ClaimOutcome::Claimed { claim, reclaimed } => {
                assert!(reclaimed.is_none());
                claim
            }
            ClaimOutcome::AlreadyRunning { .. } => panic!("first claim should win"),
        };

        let second = store
            .try_claim(&key, 7200, now, reclaim)
            .await
            .expect("claim");
        assert!(matches!(second, ClaimOutcome::AlreadyRunning { .. }));

        // Different entity claims proceed in parallel
        let other = store
            .try_claim(&test_key("MSFT"), 7200, now, reclaim)
            .await
            .expect("claim");
        assert!(matches!(other, ClaimOutcome::Claimed { .. }));

        // Completion frees the entity for the next claim
        let completed = store
            .complete(
                claim,
                RefreshOutcome::Success {
                    items_processed: 10,
                },
                now,
            )
            .await
            .expect("complete");
        assert!(completed);

        let third = store
            .try_claim(&key, 7200, now, reclaim)
            .await
            .expect("claim");
        assert!(matches!(third, ClaimOutcome::Claimed { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claimers_single_winner() {
        let store = Arc::new(MemoryStore::new());
        let key = test_key("AAPL");
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store
                    .try_claim(&key, 7200, now, Duration::from_secs(180))
                    .await
                    .expect("claim")
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if let ClaimOutcome::Claimed { .. } = handle.await.expect("join") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        // Exactly one attempt is running
        let running = store.running_attempt(&key).await.expect("read");
        assert!(running.is_some());
        let attempts = store.recent_attempts(&key, 64).await.expect("read");
        assert_eq!(
            attempts
                .iter()
                .filter(|a| a.status == RefreshStatus::Running)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_abandoned_attempt_reclaimed() {
        let store = MemoryStore::new();
        let key = test_key("AAPL");
        let start = Utc::now();

        let first = store
            .try_claim(&key, 7200, start, Duration::from_secs(180))
            .await
            .expect("claim");
        let stale_id = match first {
            ClaimOutcome::Claimed { claim, .. } => claim.attempt_id(),
            ClaimOutcome::AlreadyRunning { .. } => panic!("first claim should win"),
        };

        // Well past the reclaim threshold, a new claimer takes over
        let later = start + chrono::Duration::seconds(600);
        let second = store
            .try_claim(&key, 7200, later, Duration::from_secs(180))
            .await
            .expect("claim");
        match second {
            ClaimOutcome::Claimed { reclaimed, .. } => {
                assert_eq!(reclaimed, Some(stale_id));
            }
            ClaimOutcome::AlreadyRunning { .. } => panic!("stale attempt should be reclaimed"),
        }

        // The abandoned attempt is now failed with an abandonment error
        let attempts = store.recent_attempts(&key, 10).await.expect("read");
        let stale = attempts
            .iter()
            .find(|a| a.attempt_id == stale_id)
            .expect("attempt retained");
        assert_eq!(stale.status, RefreshStatus::Failed);
        assert!(stale.error.as_deref().unwrap_or("").contains("abandoned"));
    }

    #[tokio::test]
    async fn test_failed_attempt_not_a_last_success() {
        let store = MemoryStore::new();
        let key = test_key("AAPL");
        let now = Utc::now();

        let outcome = store
            .try_claim(&key, 7200, now, Duration::from_secs(180))
            .await
            .expect("claim");
        let claim = match outcome {
            ClaimOutcome::Claimed { claim, .. } => claim,
            ClaimOutcome::AlreadyRunning { .. } => panic!("claim should win"),
        };
        store
            .complete(
                claim,
                RefreshOutcome::Failed {
                    error: "upstream 503".to_string(),
                },
                now,
            )
            .await
            .expect("complete");

        assert!(store.last_success(&key).await.expect("read").is_none());

        // A later success is picked up
        let outcome = store
            .try_claim(&key, 3600, now, Duration::from_secs(180))
            .await
            .expect("claim");
        let claim = match outcome {
            ClaimOutcome::Claimed { claim, .. } => claim,
            ClaimOutcome::AlreadyRunning { .. } => panic!("claim should win"),
        };
        let completed_at = now + chrono::Duration::seconds(5);
        store
            .complete(
                claim,
                RefreshOutcome::Success { items_processed: 7 },
                completed_at,
            )
            .await
            .expect("complete");

        let success = store
            .last_success(&key)
            .await
            .expect("read")
            .expect("success exists");
        assert_eq!(success.completed_at, completed_at);
        assert_eq!(success.items_processed, 7);
        assert_eq!(success.ttl_seconds_used, 3600);
    }

    #[tokio::test]
    async fn test_double_completion_is_noop() {
        let store = MemoryStore::new();
        let key = test_key("AAPL");
        let now = Utc::now();

        let outcome = store
            .try_claim(&key, 7200, now, Duration::from_secs(180))
            .await
            .expect("claim");
        let claim = match outcome {
            ClaimOutcome::Claimed { claim, .. } => claim,
            ClaimOutcome::AlreadyRunning { .. } => panic!("claim should win"),
        };
        let attempt_id = claim.attempt_id();
        let started_at = claim.started_at();

        // A maintenance sweep races the completion and fails the attempt first
        let swept = store
            .sweep_abandoned(now + chrono::Duration::seconds(600), Duration::from_secs(180))
            .await
            .expect("sweep");
        assert_eq!(swept.len(), 1);

        // The late completion is a no-op, not corruption
        let late = Claim::new(attempt_id, key.clone(), started_at);
        let applied = store
            .complete(
                late,
                RefreshOutcome::Success {
                    items_processed: 99,
                },
                now,
            )
            .await
            .expect("complete");
        assert!(!applied);

        let attempts = store.recent_attempts(&key, 10).await.expect("read");
        assert_eq!(attempts[0].status, RefreshStatus::Failed);
        assert_ne!(attempts[0].items_processed, 99);
    }

    #[tokio::test]
    async fn test_complete_unknown_attempt_errors() {
        let store = MemoryStore::new();
        let key = test_key("AAPL");
        let bogus = Claim::new(freshet_core::new_attempt_id(), key, Utc::now());
        let err = store
            .complete(
                bogus,
                RefreshOutcome::Success { items_processed: 0 },
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AttemptNotFound { .. }));
    }

    #[tokio::test]
    async fn test_prune_terminal_keeps_running_and_recent() {
        let store = MemoryStore::new();
        let key = test_key("AAPL");
        let old = Utc::now() - chrono::Duration::days(60);

        // Old failed attempt
        let outcome = store
            .try_claim(&key, 7200, old, Duration::from_secs(180))
            .await
            .expect("claim");
        if let ClaimOutcome::Claimed { claim, .. } = outcome {
            store
                .complete(
                    claim,
                    RefreshOutcome::Failed {
                        error: "boom".to_string(),
                    },
                    old,
                )
                .await
                .expect("complete");
        }

        // Current running attempt
        let now = Utc::now();
        store
            .try_claim(&key, 7200, now, Duration::from_secs(180))
            .await
            .expect("claim");

        let pruned = store
            .prune_terminal(now - chrono::Duration::days(30))
            .await
            .expect("prune");
        assert_eq!(pruned, 1);
        assert_eq!(store.attempt_count(), 1);
        assert!(store.running_attempt(&key).await.expect("read").is_some());
    }
}
