//! Storage key encoding shared by the LMDB backend.
//!
//! All keys are UTF-8 strings with a type prefix and `:`-separated
//! components; entity identifiers are validated at construction to never
//! contain the separator, so keys parse unambiguously:
//!
//! - `rec:<domain>:<entity>:<period>`       - cached records
//! - `fact:<domain>:<entity>:<date>:<hex>`  - activity facts
//! - `att:<domain>:<entity>:<attempt_id>`   - refresh attempts (UUIDv7 sorts
//!   by claim time, so prefix scans yield chronological order)
//! - `run:<domain>:<entity>`                - running-attempt marker, the
//!   uniqueness row backing the claim
//!
//! String keys sort lexicographically in LMDB, which keeps each entity's
//! rows contiguous and makes prefix scans cheap.

use freshet_core::{AttemptId, EntityKey, FilingActivityFact, Period};

/// Key for a cached record row.
pub fn record_key(key: &EntityKey, period: Period) -> String {
    format!("rec:{}:{}", key.storage_token(), period.storage_key())
}

/// Prefix covering every record row for an entity.
pub fn record_prefix(key: &EntityKey) -> String {
    format!("rec:{}:", key.storage_token())
}

/// Key for an activity fact row. The event date sits before the fingerprint
/// so date-bounded prefix scans can stop early.
pub fn fact_key(fact: &FilingActivityFact) -> String {
    format!(
        "fact:{}:{}:{}",
        fact.key.storage_token(),
        fact.event_date,
        fact.fingerprint_hex()
    )
}

/// Prefix covering every fact row for an entity.
pub fn fact_prefix(key: &EntityKey) -> String {
    format!("fact:{}:", key.storage_token())
}

/// Key for a refresh attempt row.
pub fn attempt_key(key: &EntityKey, attempt_id: AttemptId) -> String {
    format!("att:{}:{}", key.storage_token(), attempt_id)
}

/// Prefix covering every attempt row for an entity.
pub fn attempt_prefix(key: &EntityKey) -> String {
    format!("att:{}:", key.storage_token())
}

/// Prefix covering every attempt row in the store.
pub const ALL_ATTEMPTS_PREFIX: &str = "att:";

/// The running-attempt marker for an entity. At most one exists per entity;
/// its value is the running attempt's id.
pub fn running_marker_key(key: &EntityKey) -> String {
    format!("run:{}", key.storage_token())
}

/// Prefix covering every running marker in the store.
pub const ALL_RUNNING_PREFIX: &str = "run:";

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use freshet_core::DataDomain;

    fn test_key() -> EntityKey {
        EntityKey::new(DataDomain::InsiderFilings, "AAPL").expect("valid key")
    }

    #[test]
    fn test_record_key_shape() {
        let key = record_key(
            &test_key(),
            Period::Month {
                year: 2026,
                month: 8,
            },
        );
        assert_eq!(key, "rec:insider_filings:AAPL:2026-08");
        assert!(key.starts_with(&record_prefix(&test_key())));
    }

    #[test]
    fn test_fact_key_contains_date_and_fingerprint() {
        let fact = FilingActivityFact {
            key: test_key(),
            accession: "0001-26-000123".to_string(),
            participant: "J SMITH".to_string(),
            event_date: NaiveDate::from_ymd_opt(2026, 8, 20).expect("valid date"),
            attributes: serde_json::Value::Null,
            recorded_at: Utc::now(),
        };
        let key = fact_key(&fact);
        assert!(key.starts_with("fact:insider_filings:AAPL:2026-08-20:"));
        assert!(key.ends_with(&fact.fingerprint_hex()));
    }

    #[test]
    fn test_attempt_keys_sort_chronologically() {
        let a = attempt_key(&test_key(), freshet_core::new_attempt_id());
        let b = attempt_key(&test_key(), freshet_core::new_attempt_id());
        assert!(a <= b);
        assert!(a.starts_with(&attempt_prefix(&test_key())));
    }

    #[test]
    fn test_running_marker_is_per_entity() {
        let other = EntityKey::new(DataDomain::InsiderFilings, "MSFT").expect("valid key");
        assert_ne!(running_marker_key(&test_key()), running_marker_key(&other));
        assert!(running_marker_key(&test_key()).starts_with(ALL_RUNNING_PREFIX));
    }

    #[test]
    fn test_prefixes_do_not_collide_across_types() {
        let entity = test_key();
        let prefixes = [
            record_prefix(&entity),
            fact_prefix(&entity),
            attempt_prefix(&entity),
            running_marker_key(&entity),
        ];
        for (i, a) in prefixes.iter().enumerate() {
            for (j, b) in prefixes.iter().enumerate() {
                if i != j {
                    assert!(!a.starts_with(b.as_str()));
                }
            }
        }
    }
}

// =============================================================================
// PROPERTY-BASED TESTS
// =============================================================================
