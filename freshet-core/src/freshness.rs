//! The per-read freshness decision.

use serde::{Deserialize, Serialize};

use crate::calendar::MarketSession;
use crate::identity::Timestamp;
use crate::signals::ActivitySignals;

/// Ephemeral result of a freshness check; computed per read, never persisted.
///
/// Carries the signal snapshot and the market session that produced the TTL
/// so the `inspect` diagnostic can explain the decision to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessDecision {
    pub is_fresh: bool,
    pub ttl_seconds: i64,
    /// Seconds since the last successful refresh. None when never refreshed.
    pub age_seconds: Option<f64>,
    pub last_refresh_at: Option<Timestamp>,
    pub signals: ActivitySignals,
    pub session: MarketSession,
}

impl FreshnessDecision {
    /// Derive a decision from the last successful refresh time and TTL.
    ///
    /// An entity with no successful refresh is always stale.
    pub fn derive(
        last_refresh_at: Option<Timestamp>,
        ttl_seconds: i64,
        signals: ActivitySignals,
        session: MarketSession,
        now: Timestamp,
    ) -> Self {
        let age_seconds = last_refresh_at.map(|at| {
            let micros = now.signed_duration_since(at).num_microseconds().unwrap_or(i64::MAX);
            (micros as f64 / 1_000_000.0).max(0.0)
        });
        let is_fresh = age_seconds.map_or(false, |age| age < ttl_seconds as f64);
        Self {
            is_fresh,
            ttl_seconds,
            age_seconds,
            last_refresh_at,
            signals,
            session,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn decision_at(age_secs: i64, ttl_seconds: i64) -> FreshnessDecision {
        let now = Utc.with_ymd_and_hms(2026, 8, 25, 15, 0, 0).single().expect("valid time");
        let last = now - chrono::Duration::seconds(age_secs);
        FreshnessDecision::derive(
            Some(last),
            ttl_seconds,
            ActivitySignals::empty(),
            MarketSession::RegularHours,
            now,
        )
    }

    #[test]
    fn test_fresh_when_age_below_ttl() {
        let decision = decision_at(100, 7200);
        assert!(decision.is_fresh);
        assert_eq!(decision.age_seconds, Some(100.0));
    }

    #[test]
    fn test_stale_when_age_at_ttl() {
        let decision = decision_at(7200, 7200);
        assert!(!decision.is_fresh);
    }

    #[test]
    fn test_never_refreshed_is_stale() {
        let now = Utc.with_ymd_and_hms(2026, 8, 25, 15, 0, 0).single().expect("valid time");
        let decision = FreshnessDecision::derive(
            None,
            7200,
            ActivitySignals::empty(),
            MarketSession::RegularHours,
            now,
        );
        assert!(!decision.is_fresh);
        assert!(decision.age_seconds.is_none());
        assert!(decision.last_refresh_at.is_none());
    }

    #[test]
    fn test_backwards_clock_clamps_age() {
        let now = Utc.with_ymd_and_hms(2026, 8, 25, 15, 0, 0).single().expect("valid time");
        let future = now + chrono::Duration::seconds(30);
        let decision = FreshnessDecision::derive(
            Some(future),
            7200,
            ActivitySignals::empty(),
            MarketSession::RegularHours,
            now,
        );
        assert_eq!(decision.age_seconds, Some(0.0));
        assert!(decision.is_fresh);
    }
}
