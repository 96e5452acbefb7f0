//! Trading calendar context and the injectable clock.

use chrono::{Datelike, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::identity::Timestamp;

/// Clock provider, injected so tests can control time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now()
    }
}

/// Calendar context a timestamp falls into, from the TTL calculator's
/// perspective. Weekend dominates: a Saturday is `Weekend` even at an hour
/// that would be regular-session on a weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketSession {
    RegularHours,
    OffHours,
    Weekend,
}

impl std::fmt::Display for MarketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            MarketSession::RegularHours => "regular_hours",
            MarketSession::OffHours => "off_hours",
            MarketSession::Weekend => "weekend",
        };
        write!(f, "{}", value)
    }
}

/// Market-hours predicate over a fixed Sat/Sun weekend and a configurable
/// UTC session window. DST-exact exchange calendars are out of scope; the
/// session window is a plain UTC interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketCalendar {
    /// Session open, inclusive (UTC).
    pub open: NaiveTime,
    /// Session close, exclusive (UTC).
    pub close: NaiveTime,
}

impl Default for MarketCalendar {
    fn default() -> Self {
        // US regular session, 09:30-16:00 Eastern, expressed in UTC.
        Self {
            open: NaiveTime::from_hms_opt(14, 30, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(21, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl MarketCalendar {
    /// Create a calendar with an explicit UTC session window.
    pub fn new(open: NaiveTime, close: NaiveTime) -> Self {
        Self { open, close }
    }

    /// Classify the session a timestamp falls into.
    pub fn session_at(&self, at: Timestamp) -> MarketSession {
        if matches!(at.weekday(), Weekday::Sat | Weekday::Sun) {
            return MarketSession::Weekend;
        }
        let time = at.time();
        if time >= self.open && time < self.close {
            MarketSession::RegularHours
        } else {
            MarketSession::OffHours
        }
    }

    /// True when the timestamp is inside the weekday regular session.
    pub fn is_market_hours(&self, at: Timestamp) -> bool {
        self.session_at(at) == MarketSession::RegularHours
    }

    /// Reject inverted session windows.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.open >= self.close {
            return Err(ConfigError::InvalidValue {
                field: "market_calendar.open".to_string(),
                value: format!("{} >= {}", self.open, self.close),
                reason: "session open must precede close".to_string(),
            });
        }
        Ok(())
    }

    /// Seconds-precision check that the window covers at least one minute.
    pub fn session_minutes(&self) -> u32 {
        let secs = (self.close.num_seconds_from_midnight() as i64
            - self.open.num_seconds_from_midnight() as i64)
            .max(0);
        (secs / 60) as u32
    }
}

// =============================================================================
// TESTS
// =============================================================================
