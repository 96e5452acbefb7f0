//! Engine and maintenance configuration.

use std::time::Duration;

use freshet_core::{ConfigError, MarketCalendar, TtlPolicy};

// ============================================================================
// DEFAULTS
// ============================================================================

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
/// Six fetch timeouts: long enough to survive a slow upstream, short enough
/// that a crashed worker's claim is reclaimed within minutes.
const DEFAULT_RECLAIM_AFTER_SECS: u64 = 180;
const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;
const DEFAULT_FETCHES_PER_MINUTE: u32 = 60;
const DEFAULT_FETCH_BURST: u32 = 10;

const DEFAULT_MAINT_CHECK_INTERVAL_SECS: u64 = 60;
const DEFAULT_ATTEMPT_RETENTION_DAYS: u64 = 30;

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

/// Whether a stale read waits for its refresh or only triggers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// The stale read awaits the refresh and serves the updated data.
    Blocking,
    /// The refresh runs in a spawned task; the stale read serves what is
    /// cached and returns immediately.
    #[default]
    Background,
}

/// Configuration for the refresh engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TTL table and modifiers driving the freshness decision.
    pub ttl: TtlPolicy,

    /// Market calendar used for session-based TTL modifiers.
    pub calendar: MarketCalendar,

    /// Stale-read behavior (default: background).
    pub mode: RefreshMode,

    /// Upper bound on a single upstream fetch (default: 30 seconds).
    pub fetch_timeout: Duration,

    /// Age past which a running attempt is considered abandoned and its
    /// claim may be taken over (default: 180 seconds).
    pub reclaim_after: Duration,

    /// Maximum upstream fetches in flight at once (default: 8).
    pub max_concurrent_fetches: usize,

    /// Steady-state upstream request rate; `None` disables rate limiting
    /// (default: 60 per minute).
    pub fetches_per_minute: Option<u32>,

    /// Burst allowance on top of the steady rate (default: 10).
    pub fetch_burst: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ttl: TtlPolicy::default(),
            calendar: MarketCalendar::default(),
            mode: RefreshMode::default(),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            reclaim_after: Duration::from_secs(DEFAULT_RECLAIM_AFTER_SECS),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            fetches_per_minute: Some(DEFAULT_FETCHES_PER_MINUTE),
            fetch_burst: DEFAULT_FETCH_BURST,
        }
    }
}

impl EngineConfig {
    /// Create EngineConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `FRESHET_MODE`: "blocking" or "background" (default: background)
    /// - `FRESHET_FETCH_TIMEOUT_SECS`: Upstream fetch timeout (default: 30)
    /// - `FRESHET_RECLAIM_AFTER_SECS`: Abandoned-attempt threshold (default: 180)
    /// - `FRESHET_MAX_CONCURRENT_FETCHES`: Concurrent fetch cap (default: 8)
    /// - `FRESHET_FETCHES_PER_MINUTE`: Upstream rate limit; 0 disables (default: 60)
    /// - `FRESHET_FETCH_BURST`: Rate limit burst allowance (default: 10)
    pub fn from_env() -> Self {
        let mode = match std::env::var("FRESHET_MODE").ok().as_deref() {
            Some("blocking") => RefreshMode::Blocking,
            _ => RefreshMode::Background,
        };

        let fetch_timeout = Duration::from_secs(
            std::env::var("FRESHET_FETCH_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
        );

        let reclaim_after = Duration::from_secs(
            std::env::var("FRESHET_RECLAIM_AFTER_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RECLAIM_AFTER_SECS),
        );

        let max_concurrent_fetches = std::env::var("FRESHET_MAX_CONCURRENT_FETCHES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONCURRENT_FETCHES);

        let fetches_per_minute = std::env::var("FRESHET_FETCHES_PER_MINUTE")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .map_or(Some(DEFAULT_FETCHES_PER_MINUTE), |rate| {
                (rate > 0).then_some(rate)
            });

        let fetch_burst = std::env::var("FRESHET_FETCH_BURST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_FETCH_BURST);

        Self {
            ttl: TtlPolicy::default(),
            calendar: MarketCalendar::default(),
            mode,
            fetch_timeout,
            reclaim_after,
            max_concurrent_fetches,
            fetches_per_minute,
            fetch_burst,
        }
    }

    /// Create a configuration for development/testing with tight timeouts
    /// and no rate limiting.
    pub fn development() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(5),
            reclaim_after: Duration::from_secs(30),
            max_concurrent_fetches: 2,
            fetches_per_minute: None,
            ..Self::default()
        }
    }

    /// Create a configuration for production.
    pub fn production() -> Self {
        Self::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ttl.validate()?;
        self.calendar.validate()?;

        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "fetch_timeout".to_string(),
                value: format!("{:?}", self.fetch_timeout),
                reason: "must be positive".to_string(),
            });
        }

        // A reclaim threshold below the fetch timeout would let a second
        // worker take over an attempt that is still legitimately fetching.
        if self.reclaim_after < self.fetch_timeout {
            return Err(ConfigError::InvalidValue {
                field: "reclaim_after".to_string(),
                value: format!("{:?}", self.reclaim_after),
                reason: "must be at least the fetch timeout".to_string(),
            });
        }

        if self.max_concurrent_fetches == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_fetches".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.fetches_per_minute == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "fetches_per_minute".to_string(),
                value: "0".to_string(),
                reason: "use None to disable rate limiting".to_string(),
            });
        }

        if self.fetch_burst == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fetch_burst".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

// ============================================================================
// MAINTENANCE CONFIGURATION
// ============================================================================

/// Configuration for the ledger maintenance background task.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// How often to run a maintenance cycle (default: 60 seconds)
    pub check_interval: Duration,

    /// Running attempts older than this are failed as abandoned
    /// (default: 180 seconds, matching the engine's reclaim threshold)
    pub sweep_after: Duration,

    /// How long terminal attempts are retained before pruning
    /// (default: 30 days)
    pub retention: Duration,

    /// Whether to log each swept attempt (default: true)
    pub log_actions: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_MAINT_CHECK_INTERVAL_SECS),
            sweep_after: Duration::from_secs(DEFAULT_RECLAIM_AFTER_SECS),
            retention: Duration::from_secs(DEFAULT_ATTEMPT_RETENTION_DAYS * 24 * 3600),
            log_actions: true,
        }
    }
}

impl MaintenanceConfig {
    /// Create MaintenanceConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `FRESHET_MAINT_CHECK_INTERVAL_SECS`: Cycle interval (default: 60)
    /// - `FRESHET_MAINT_SWEEP_AFTER_SECS`: Abandoned threshold (default: 180)
    /// - `FRESHET_ATTEMPT_RETENTION_DAYS`: Terminal attempt retention (default: 30)
    /// - `FRESHET_MAINT_LOG_ACTIONS`: Whether to log sweeps (default: true)
    pub fn from_env() -> Self {
        let check_interval = Duration::from_secs(
            std::env::var("FRESHET_MAINT_CHECK_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAINT_CHECK_INTERVAL_SECS),
        );

        let sweep_after = Duration::from_secs(
            std::env::var("FRESHET_MAINT_SWEEP_AFTER_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RECLAIM_AFTER_SECS),
        );

        let retention = Duration::from_secs(
            std::env::var("FRESHET_ATTEMPT_RETENTION_DAYS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(DEFAULT_ATTEMPT_RETENTION_DAYS)
                * 24
                * 3600,
        );

        let log_actions = std::env::var("FRESHET_MAINT_LOG_ACTIONS")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            check_interval,
            sweep_after,
            retention,
            log_actions,
        }
    }

    /// Create a configuration for development/testing with short intervals.
    pub fn development() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            sweep_after: Duration::from_secs(30),
            retention: Duration::from_secs(3600),
            log_actions: true,
        }
    }

    /// Create a configuration for production.
    pub fn production() -> Self {
        Self::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "check_interval".to_string(),
                value: format!("{:?}", self.check_interval),
                reason: "must be positive".to_string(),
            });
        }

        if self.retention < self.check_interval {
            return Err(ConfigError::InvalidValue {
                field: "retention".to_string(),
                value: format!("{:?}", self.retention),
                reason: "must be at least the check interval".to_string(),
            });
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
