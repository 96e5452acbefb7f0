//! Engine and maintenance counters.
//!
//! Plain atomics; snapshots can be exposed via whatever telemetry surface
//! embeds the engine.

use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// ENGINE METRICS
// ============================================================================

/// Counters for the read and refresh paths.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Total freshness checks performed
    pub freshness_checks: AtomicU64,

    /// Reads served with fresh data
    pub fresh_serves: AtomicU64,

    /// Reads served with stale data while a refresh ran or failed
    pub stale_serves: AtomicU64,

    /// Refresh attempts claimed and started
    pub refreshes_started: AtomicU64,

    /// Refresh attempts completed successfully
    pub refreshes_succeeded: AtomicU64,

    /// Refresh attempts that ended in failure
    pub refreshes_failed: AtomicU64,

    /// Fetches that hit the timeout
    pub fetch_timeouts: AtomicU64,

    /// Claims lost to a refresh already in flight
    pub claims_lost: AtomicU64,

    /// Abandoned attempts reclaimed inline by a newer claim
    pub abandoned_reclaims: AtomicU64,
}

impl EngineMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            freshness_checks: self.freshness_checks.load(Ordering::Relaxed),
            fresh_serves: self.fresh_serves.load(Ordering::Relaxed),
            stale_serves: self.stale_serves.load(Ordering::Relaxed),
            refreshes_started: self.refreshes_started.load(Ordering::Relaxed),
            refreshes_succeeded: self.refreshes_succeeded.load(Ordering::Relaxed),
            refreshes_failed: self.refreshes_failed.load(Ordering::Relaxed),
            fetch_timeouts: self.fetch_timeouts.load(Ordering::Relaxed),
            claims_lost: self.claims_lost.load(Ordering::Relaxed),
            abandoned_reclaims: self.abandoned_reclaims.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of engine metrics at a point in time.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub freshness_checks: u64,
    pub fresh_serves: u64,
    pub stale_serves: u64,
    pub refreshes_started: u64,
    pub refreshes_succeeded: u64,
    pub refreshes_failed: u64,
    pub fetch_timeouts: u64,
    pub claims_lost: u64,
    pub abandoned_reclaims: u64,
}

// ============================================================================
// MAINTENANCE METRICS
// ============================================================================

/// Counters for the ledger maintenance task.
#[derive(Debug, Default)]
pub struct MaintenanceMetrics {
    /// Total maintenance cycles completed
    pub sweep_cycles: AtomicU64,

    /// Abandoned running attempts failed by the sweep
    pub attempts_swept: AtomicU64,

    /// Terminal attempts pruned past retention
    pub attempts_pruned: AtomicU64,

    /// Errors encountered during maintenance
    pub maintenance_errors: AtomicU64,
}

impl MaintenanceMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> MaintenanceSnapshot {
        MaintenanceSnapshot {
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
            attempts_swept: self.attempts_swept.load(Ordering::Relaxed),
            attempts_pruned: self.attempts_pruned.load(Ordering::Relaxed),
            maintenance_errors: self.maintenance_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of maintenance metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MaintenanceSnapshot {
    pub sweep_cycles: u64,
    pub attempts_swept: u64,
    pub attempts_pruned: u64,
    pub maintenance_errors: u64,
}

// ============================================================================
// TESTS
// ============================================================================
