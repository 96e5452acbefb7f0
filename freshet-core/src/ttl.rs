//! Adaptive TTL policy: activity tiers plus calendar adjustments.
//!
//! Pure and deterministic - identical signals and session always yield the
//! same TTL. The tier table and every adjustment knob live in `TtlPolicy`
//! so each data domain shares one calculator with its own configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calendar::MarketSession;
use crate::error::ConfigError;
use crate::signals::ActivitySignals;

/// Named row of the activity tier table, exposed for diagnostics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityTier {
    /// 7-day count at or above the hot threshold.
    Hot,
    /// 7-day count at or above the active threshold.
    Active,
    /// Some 7-day activity below the active threshold.
    Quiet,
    /// No 7-day activity but meaningful 30-day activity.
    Monthly,
    /// No recent activity at all.
    Dormant,
}

impl std::fmt::Display for ActivityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            ActivityTier::Hot => "hot",
            ActivityTier::Active => "active",
            ActivityTier::Quiet => "quiet",
            ActivityTier::Monthly => "monthly",
            ActivityTier::Dormant => "dormant",
        };
        write!(f, "{}", value)
    }
}

/// Configuration for the adaptive TTL calculation.
///
/// Defaults reproduce the tier table:
///
/// | 7-day count | base TTL |
/// |---|---|
/// | >= 5 | 2h |
/// | 3-4 | 3h |
/// | 1-2 | 6h |
/// | 0, 30-day >= 3 | 12h |
/// | dormant | 24h |
///
/// Adjustments, in order: recency halving (latest event < 24h, floored at
/// 1h), then weekend x3 or off-hours x2, then the 72h ceiling. Recency is
/// applied before the calendar multiplier so a fresh event on a weekend
/// still shortens the TTL relative to a dormant entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPolicy {
    pub hot_ttl: Duration,
    pub active_ttl: Duration,
    pub quiet_ttl: Duration,
    pub monthly_ttl: Duration,
    pub dormant_ttl: Duration,

    /// 7-day count at or above this is `Hot`.
    pub hot_count: u32,
    /// 7-day count at or above this (below hot) is `Active`.
    pub active_count: u32,
    /// 30-day count at or above this rescues a 7-day-empty entity from `Dormant`.
    pub monthly_count: u32,

    /// Latest events younger than this halve the base TTL.
    pub recency_window: Duration,
    /// Floor applied after the recency halving.
    pub recency_floor: Duration,

    pub weekend_multiplier: u32,
    pub off_hours_multiplier: u32,

    /// Hard ceiling so dormant entities are still periodically rechecked.
    pub max_ttl: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            hot_ttl: Duration::from_secs(2 * 3600),
            active_ttl: Duration::from_secs(3 * 3600),
            quiet_ttl: Duration::from_secs(6 * 3600),
            monthly_ttl: Duration::from_secs(12 * 3600),
            dormant_ttl: Duration::from_secs(24 * 3600),
            hot_count: 5,
            active_count: 3,
            monthly_count: 3,
            recency_window: Duration::from_secs(24 * 3600),
            recency_floor: Duration::from_secs(3600),
            weekend_multiplier: 3,
            off_hours_multiplier: 2,
            max_ttl: Duration::from_secs(72 * 3600),
        }
    }
}

impl TtlPolicy {
    /// Classify signals into a tier row.
    pub fn tier_for(&self, signals: &ActivitySignals) -> ActivityTier {
        if signals.count_7d >= self.hot_count {
            ActivityTier::Hot
        } else if signals.count_7d >= self.active_count {
            ActivityTier::Active
        } else if signals.count_7d >= 1 {
            ActivityTier::Quiet
        } else if signals.count_30d >= self.monthly_count {
            ActivityTier::Monthly
        } else {
            ActivityTier::Dormant
        }
    }

    /// Base TTL for a tier, before adjustments.
    pub fn base_ttl(&self, tier: ActivityTier) -> Duration {
        match tier {
            ActivityTier::Hot => self.hot_ttl,
            ActivityTier::Active => self.active_ttl,
            ActivityTier::Quiet => self.quiet_ttl,
            ActivityTier::Monthly => self.monthly_ttl,
            ActivityTier::Dormant => self.dormant_ttl,
        }
    }

    /// Full TTL computation: tier, recency bonus, calendar multiplier, ceiling.
    pub fn duration_for(&self, signals: &ActivitySignals, session: MarketSession) -> Duration {
        let mut ttl = self.base_ttl(self.tier_for(signals));

        let recency_window_hours = self.recency_window.as_secs_f64() / 3600.0;
        if let Some(age_hours) = signals.latest_event_age_hours {
            if age_hours < recency_window_hours {
                ttl = (ttl / 2).max(self.recency_floor);
            }
        }

        ttl = match session {
            MarketSession::Weekend => ttl.saturating_mul(self.weekend_multiplier),
            MarketSession::OffHours => ttl.saturating_mul(self.off_hours_multiplier),
            MarketSession::RegularHours => ttl,
        };

        ttl.min(self.max_ttl)
    }

    /// Integer-seconds convenience form of `duration_for`.
    pub fn ttl_seconds(&self, signals: &ActivitySignals, session: MarketSession) -> i64 {
        self.duration_for(signals, session).as_secs() as i64
    }

    /// Reject non-positive durations, inverted floors/ceilings, non-monotone
    /// tier tables, and degenerate thresholds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("hot_ttl", self.hot_ttl),
            ("active_ttl", self.active_ttl),
            ("quiet_ttl", self.quiet_ttl),
            ("monthly_ttl", self.monthly_ttl),
            ("dormant_ttl", self.dormant_ttl),
            ("recency_window", self.recency_window),
            ("recency_floor", self.recency_floor),
            ("max_ttl", self.max_ttl),
        ];
        for (field, value) in positive {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0s".to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }

        let tiers = [
            self.hot_ttl,
            self.active_ttl,
            self.quiet_ttl,
            self.monthly_ttl,
            self.dormant_ttl,
        ];
        if tiers.windows(2).any(|w| w[0] > w[1]) {
            return Err(ConfigError::InvalidValue {
                field: "tier table".to_string(),
                value: format!("{:?}", tiers),
                reason: "higher activity must not yield a longer base TTL".to_string(),
            });
        }

        if self.active_count == 0 || self.hot_count <= self.active_count {
            return Err(ConfigError::InvalidValue {
                field: "hot_count/active_count".to_string(),
                value: format!("{}/{}", self.hot_count, self.active_count),
                reason: "thresholds must satisfy 0 < active_count < hot_count".to_string(),
            });
        }

        if self.monthly_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "monthly_count".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        if self.recency_floor > self.hot_ttl {
            return Err(ConfigError::InvalidValue {
                field: "recency_floor".to_string(),
                value: format!("{:?}", self.recency_floor),
                reason: "floor must not exceed the shortest tier TTL".to_string(),
            });
        }

        if self.max_ttl < self.dormant_ttl {
            return Err(ConfigError::InvalidValue {
                field: "max_ttl".to_string(),
                value: format!("{:?}", self.max_ttl),
                reason: "ceiling must cover the dormant tier".to_string(),
            });
        }

        if self.off_hours_multiplier < 1 || self.weekend_multiplier < self.off_hours_multiplier {
            return Err(ConfigError::InvalidValue {
                field: "weekend_multiplier/off_hours_multiplier".to_string(),
                value: format!(
                    "{}/{}",
                    self.weekend_multiplier, self.off_hours_multiplier
                ),
                reason: "multipliers must satisfy 1 <= off_hours <= weekend".to_string(),
            });
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
