//! FRESHET Core - Domain Types
//!
//! Pure data structures and pure computation for the adaptive cache-freshness
//! engine: entity keys, cached records, activity facts, refresh attempts, the
//! activity-signal arithmetic, the TTL policy, and the trading calendar.
//! No I/O lives here - storage and orchestration build on top of this crate.

pub mod calendar;
pub mod error;
pub mod fetch;
pub mod freshness;
pub mod identity;
pub mod records;
pub mod signals;
pub mod ttl;

pub use calendar::{Clock, MarketCalendar, MarketSession, SystemClock};
pub use error::{
    ConfigError, FetchError, FreshetError, FreshetResult, StorageError, ValidationError,
};
pub use fetch::{FetchPayload, FetchProvider};
pub use freshness::FreshnessDecision;
pub use identity::{
    AttemptId, DataDomain, DataDomainParseError, EntityKey, Period, PeriodParseError, Timestamp,
    new_attempt_id,
};
pub use records::{
    CachedRecord, CompletedRefresh, FilingActivityFact, RefreshAttempt, RefreshStatus,
    RefreshStatusParseError,
};
pub use signals::{ActivitySignals, CLUSTER_PARTICIPANT_THRESHOLD};
pub use ttl::{ActivityTier, TtlPolicy};
