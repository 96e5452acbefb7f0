//! Ledger Maintenance Background Task
//!
//! Periodically sweeps refresh attempts that are stuck in `running` - a
//! worker crashed, the process was killed mid-fetch, or a completion write
//! was lost - and prunes terminal attempts past the retention window so the
//! ledger stays bounded.
//!
//! The read path does not depend on this task: `try_claim` reclaims
//! abandoned attempts inline. The sweep keeps the ledger tidy for entities
//! nobody is reading.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use freshet_core::{Clock, Timestamp};
use freshet_store::RefreshLedger;

use crate::config::MaintenanceConfig;
use crate::metrics::MaintenanceMetrics;

/// Background task that periodically sweeps and prunes the refresh ledger.
///
/// Runs until the shutdown signal is received and returns the metrics
/// collected over its lifetime.
pub async fn maintenance_task<S>(
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: MaintenanceConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<MaintenanceMetrics>
where
    S: RefreshLedger + 'static,
{
    let metrics = Arc::new(MaintenanceMetrics::new());

    let mut check_interval = interval(config.check_interval);
    check_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        check_interval_secs = config.check_interval.as_secs(),
        sweep_after_secs = config.sweep_after.as_secs(),
        retention_secs = config.retention.as_secs(),
        "Ledger maintenance task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Ledger maintenance task shutting down");
                    break;
                }
            }

            _ = check_interval.tick() => {
                run_maintenance_cycle(&*store, clock.now(), &config, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        sweep_cycles = snapshot.sweep_cycles,
        attempts_swept = snapshot.attempts_swept,
        attempts_pruned = snapshot.attempts_pruned,
        maintenance_errors = snapshot.maintenance_errors,
        "Ledger maintenance task completed"
    );

    metrics
}

/// Perform one maintenance cycle. Split out so tests can run it with a
/// controlled `now` instead of waiting on the interval.
pub async fn run_maintenance_cycle<S>(
    store: &S,
    now: Timestamp,
    config: &MaintenanceConfig,
    metrics: &MaintenanceMetrics,
) where
    S: RefreshLedger,
{
    metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);

    match store.sweep_abandoned(now, config.sweep_after).await {
        Ok(swept) => {
            if !swept.is_empty() {
                metrics
                    .attempts_swept
                    .fetch_add(swept.len() as u64, Ordering::Relaxed);
                if config.log_actions {
                    for attempt in &swept {
                        tracing::warn!(
                            key = %attempt.key.storage_token(),
                            attempt_id = %attempt.attempt_id,
                            started_at = %attempt.started_at,
                            "Swept abandoned refresh attempt"
                        );
                    }
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to sweep abandoned attempts");
            metrics.maintenance_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    let retention = chrono::Duration::from_std(config.retention)
        .unwrap_or_else(|_| chrono::Duration::days(30));
    match store.prune_terminal(now - retention).await {
        Ok(pruned) => {
            if pruned > 0 {
                metrics.attempts_pruned.fetch_add(pruned, Ordering::Relaxed);
                tracing::info!(count = pruned, "Pruned terminal refresh attempts");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to prune terminal attempts");
            metrics.maintenance_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
