//! Activity signal computation over an entity's historical facts.
//!
//! Pure window arithmetic: counts over trailing 7/30/90 day windows, the age
//! of the latest event, and a cluster flag for coordinated behavior. The
//! storage read that feeds this lives in the store crate; everything here is
//! deterministic given the facts and a timestamp.

use std::collections::HashSet;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::identity::Timestamp;
use crate::records::FilingActivityFact;

/// Distinct participants acting within the trailing 7 days at or above this
/// count flag coordinated/clustered behavior.
pub const CLUSTER_PARTICIPANT_THRESHOLD: usize = 3;

/// Recency and volume statistics over an entity's activity facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySignals {
    pub count_7d: u32,
    pub count_30d: u32,
    pub count_90d: u32,
    /// Hours since the latest known event, measured from the event date's
    /// midnight UTC (filings are date-granular). None when no facts exist.
    pub latest_event_age_hours: Option<f64>,
    pub distinct_participants_30d: u32,
    pub has_cluster_activity_7d: bool,
}

impl ActivitySignals {
    /// Signals for an entity with no recorded activity.
    pub fn empty() -> Self {
        Self {
            count_7d: 0,
            count_30d: 0,
            count_90d: 0,
            latest_event_age_hours: None,
            distinct_participants_30d: 0,
            has_cluster_activity_7d: false,
        }
    }

    /// Compute signals from raw facts as of `now`.
    ///
    /// Fact ages are measured from the event date's midnight UTC. Events
    /// dated in the future (bad upstream data) count toward the windows but
    /// clamp to age zero.
    pub fn compute(facts: &[FilingActivityFact], now: Timestamp) -> Self {
        if facts.is_empty() {
            return Self::empty();
        }

        let mut count_7d = 0u32;
        let mut count_30d = 0u32;
        let mut count_90d = 0u32;
        let mut participants_7d: HashSet<&str> = HashSet::new();
        let mut participants_30d: HashSet<&str> = HashSet::new();
        let mut latest: Option<Timestamp> = None;

        for fact in facts {
            let event_at = fact.event_date.and_time(NaiveTime::MIN).and_utc();
            let age = now.signed_duration_since(event_at);

            if age <= chrono::Duration::days(90) {
                count_90d += 1;
            }
            if age <= chrono::Duration::days(30) {
                count_30d += 1;
                participants_30d.insert(fact.participant.as_str());
            }
            if age <= chrono::Duration::days(7) {
                count_7d += 1;
                participants_7d.insert(fact.participant.as_str());
            }

            if latest.map_or(true, |l| event_at > l) {
                latest = Some(event_at);
            }
        }

        let latest_event_age_hours = latest.map(|event_at| {
            let secs = now.signed_duration_since(event_at).num_seconds().max(0);
            secs as f64 / 3600.0
        });

        Self {
            count_7d,
            count_30d,
            count_90d,
            latest_event_age_hours,
            distinct_participants_30d: participants_30d.len() as u32,
            has_cluster_activity_7d: participants_7d.len() >= CLUSTER_PARTICIPANT_THRESHOLD,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
