//! The refresh engine: per-read freshness decisions and claimed refreshes.
//!
//! `ensure_fresh` is the single entry point for readers. It recomputes the
//! entity's TTL from stored activity facts on every call, serves whatever
//! the cache holds, and claims a refresh through the ledger when the data
//! is stale. The claim guarantees at most one refresh per entity; losers
//! serve cached data immediately.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use freshet_core::{
    ActivitySignals, AttemptId, CachedRecord, Clock, EntityKey, FetchError, FetchPayload,
    FetchProvider, FreshetResult, FreshnessDecision, StorageError, SystemClock, Timestamp,
};
use freshet_store::{Claim, ClaimOutcome, FreshetStore, RefreshOutcome};

use crate::budget::FetchBudget;
use crate::config::{EngineConfig, RefreshMode};
use crate::metrics::EngineMetrics;

/// How far back stored facts feed the activity signals.
const SIGNAL_LOOKBACK_DAYS: i64 = 90;

// ============================================================================
// SERVED DATA
// ============================================================================

/// What happened to the refresh side of a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshDisposition {
    /// Data was fresh; no refresh considered.
    NotNeeded,
    /// A blocking refresh ran and succeeded.
    Completed { items_processed: u64 },
    /// A blocking refresh ran and failed; cached data was served.
    Failed { error: String },
    /// A background refresh was spawned; cached data was served.
    Spawned { attempt_id: AttemptId },
    /// Another caller's refresh was in flight; cached data was served.
    AlreadyRunning { attempt_id: AttemptId },
}

/// Reader-facing summary of what `ensure_fresh` handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Fresh data.
    Ready,
    /// Stale data, best known while a refresh runs or after one failed.
    ServedStale,
    /// Nothing cached yet for this entity.
    NotYetAvailable,
}

/// Everything a read returns: the cached records, the freshness decision
/// that produced them, and what the engine did about staleness.
#[derive(Debug, Clone)]
pub struct ServedData {
    pub key: EntityKey,
    pub records: Vec<CachedRecord>,
    pub freshness: FreshnessDecision,
    pub refresh: RefreshDisposition,
}

impl ServedData {
    pub fn availability(&self) -> Availability {
        if self.records.is_empty() {
            Availability::NotYetAvailable
        } else if self.freshness.is_fresh {
            Availability::Ready
        } else {
            Availability::ServedStale
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Orchestrates freshness checks and claimed refreshes over a store and a
/// fetch provider.
pub struct RefreshEngine<S, F> {
    store: Arc<S>,
    fetcher: Arc<F>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    budget: Arc<FetchBudget>,
    metrics: Arc<EngineMetrics>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S, F> RefreshEngine<S, F>
where
    S: FreshetStore + Send + Sync + 'static,
    F: FetchProvider + 'static,
{
    /// Create an engine over a store and fetch provider.
    pub fn new(store: Arc<S>, fetcher: Arc<F>, config: EngineConfig) -> FreshetResult<Self> {
        config.validate()?;
        let budget = Arc::new(FetchBudget::new(
            config.max_concurrent_fetches,
            config.fetches_per_minute,
            config.fetch_burst,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            store,
            fetcher,
            clock: Arc::new(SystemClock),
            config,
            budget,
            metrics: Arc::new(EngineMetrics::new()),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Replace the wall clock. Tests drive decisions with a manual clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the fetch budget, e.g. to share one concurrency cap across
    /// several engines hitting the same upstream.
    pub fn with_budget(mut self, budget: Arc<FetchBudget>) -> Self {
        self.budget = budget;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Receiver for the engine's shutdown signal, for wiring companion
    /// tasks such as maintenance.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Signal in-flight refresh workers to stop. Workers record their
    /// attempt as failed before exiting, so no claim is left dangling.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Serve an entity's cached data, refreshing it if stale.
    ///
    /// Never blocks on the upstream in background mode; in blocking mode a
    /// stale read awaits its own refresh (but a lost claim still returns
    /// immediately with cached data).
    pub async fn ensure_fresh(&self, key: &EntityKey) -> FreshetResult<ServedData> {
        self.metrics.freshness_checks.fetch_add(1, Ordering::Relaxed);
        let decision = self.decide(key).await?;

        if decision.is_fresh {
            self.metrics.fresh_serves.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                key = %key.storage_token(),
                ttl_seconds = decision.ttl_seconds,
                age_seconds = ?decision.age_seconds,
                "Serving fresh data"
            );
            return self.serve(key, decision, RefreshDisposition::NotNeeded).await;
        }

        let now = self.clock.now();
        let outcome = self
            .store
            .try_claim(key, decision.ttl_seconds, now, self.config.reclaim_after)
            .await?;

        match outcome {
            ClaimOutcome::Claimed { claim, reclaimed } => {
                if let Some(stale_id) = reclaimed {
                    self.metrics.abandoned_reclaims.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        key = %key.storage_token(),
                        stale_attempt_id = %stale_id,
                        "Reclaimed abandoned refresh attempt"
                    );
                }
                self.metrics.refreshes_started.fetch_add(1, Ordering::Relaxed);
                let attempt_id = claim.attempt_id();
                tracing::debug!(
                    key = %key.storage_token(),
                    attempt_id = %attempt_id,
                    ttl_seconds = decision.ttl_seconds,
                    "Starting refresh"
                );
                let handle = self.spawn_refresh(key.clone(), claim);

                match self.config.mode {
                    RefreshMode::Background => {
                        self.metrics.stale_serves.fetch_add(1, Ordering::Relaxed);
                        self.serve(key, decision, RefreshDisposition::Spawned { attempt_id })
                            .await
                    }
                    RefreshMode::Blocking => {
                        let disposition = match handle.await {
                            Ok(disposition) => disposition,
                            Err(e) => RefreshDisposition::Failed {
                                error: format!("refresh task panicked: {e}"),
                            },
                        };
                        // Re-derive so the served freshness reflects the
                        // refresh that just ran (or failed).
                        let decision = self.decide(key).await?;
                        if decision.is_fresh {
                            self.metrics.fresh_serves.fetch_add(1, Ordering::Relaxed);
                        } else {
                            self.metrics.stale_serves.fetch_add(1, Ordering::Relaxed);
                        }
                        self.serve(key, decision, disposition).await
                    }
                }
            }
            ClaimOutcome::AlreadyRunning { attempt_id, since } => {
                self.metrics.claims_lost.fetch_add(1, Ordering::Relaxed);
                self.metrics.stale_serves.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    key = %key.storage_token(),
                    attempt_id = %attempt_id,
                    since = %since,
                    "Refresh already in flight, serving cached data"
                );
                self.serve(key, decision, RefreshDisposition::AlreadyRunning { attempt_id })
                    .await
            }
        }
    }

    /// Compute the freshness decision without serving or refreshing.
    /// Diagnostic; has no side effects on the ledger or the upstream.
    pub async fn inspect(&self, key: &EntityKey) -> FreshetResult<FreshnessDecision> {
        self.decide(key).await
    }

    async fn decide(&self, key: &EntityKey) -> FreshetResult<FreshnessDecision> {
        let now = self.clock.now();
        let last = self.store.last_success(key).await?;
        let cutoff = (now - chrono::Duration::days(SIGNAL_LOOKBACK_DAYS)).date_naive();
        let facts = self.store.facts_since(key, cutoff).await?;
        let signals = ActivitySignals::compute(&facts, now);
        let session = self.config.calendar.session_at(now);
        let ttl_seconds = self.config.ttl.ttl_seconds(&signals, session);
        Ok(FreshnessDecision::derive(
            last.map(|success| success.completed_at),
            ttl_seconds,
            signals,
            session,
            now,
        ))
    }

    async fn serve(
        &self,
        key: &EntityKey,
        freshness: FreshnessDecision,
        refresh: RefreshDisposition,
    ) -> FreshetResult<ServedData> {
        let records = self.store.records_for(key).await?;
        Ok(ServedData {
            key: key.clone(),
            records,
            freshness,
            refresh,
        })
    }

    fn spawn_refresh(&self, key: EntityKey, claim: Claim) -> JoinHandle<RefreshDisposition> {
        let store = Arc::clone(&self.store);
        let fetcher = Arc::clone(&self.fetcher);
        let clock = Arc::clone(&self.clock);
        let budget = Arc::clone(&self.budget);
        let metrics = Arc::clone(&self.metrics);
        let fetch_timeout = self.config.fetch_timeout;
        let shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            refresh_worker(
                store,
                fetcher,
                clock,
                budget,
                metrics,
                fetch_timeout,
                shutdown_rx,
                key,
                claim,
            )
            .await
        })
    }
}

// ============================================================================
// REFRESH WORKER
// ============================================================================

/// Resolves once the shutdown signal reads true, or never.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        // Sender dropped means the engine is gone; stop too.
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// One claimed refresh, end to end: budget, fetch, persist, complete.
/// Always transitions the claim to a terminal status, including on timeout
/// and shutdown.
#[allow(clippy::too_many_arguments)]
async fn refresh_worker<S, F>(
    store: Arc<S>,
    fetcher: Arc<F>,
    clock: Arc<dyn Clock>,
    budget: Arc<FetchBudget>,
    metrics: Arc<EngineMetrics>,
    fetch_timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    key: EntityKey,
    claim: Claim,
) -> RefreshDisposition
where
    S: FreshetStore + Send + Sync,
    F: FetchProvider,
{
    let token = key.storage_token();

    let fetch = async {
        let _permit = budget.acquire(&key).await?;
        match tokio::time::timeout(fetch_timeout, fetcher.fetch(&key)).await {
            Ok(result) => result,
            Err(_) => {
                metrics.fetch_timeouts.fetch_add(1, Ordering::Relaxed);
                Err(FetchError::Timeout {
                    key: key.storage_token(),
                    timeout_ms: fetch_timeout.as_millis() as u64,
                })
            }
        }
    };

    let fetched = tokio::select! {
        result = fetch => result,
        _ = shutdown_signalled(&mut shutdown_rx) => Err(FetchError::Cancelled {
            key: key.storage_token(),
            reason: "engine shutdown".to_string(),
        }),
    };

    match fetched {
        Ok(payload) => match persist_payload(&*store, &payload).await {
            Ok(items_processed) => {
                let completed = store
                    .complete(
                        claim,
                        RefreshOutcome::Success { items_processed },
                        clock.now(),
                    )
                    .await;
                match completed {
                    Ok(true) => {
                        metrics.refreshes_succeeded.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(
                            key = %token,
                            items = items_processed,
                            "Refresh completed"
                        );
                        RefreshDisposition::Completed { items_processed }
                    }
                    Ok(false) => {
                        // A sweep or reclaim beat the completion; the data
                        // is persisted either way.
                        metrics.refreshes_failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            key = %token,
                            "Refresh attempt already terminal, completion dropped"
                        );
                        RefreshDisposition::Failed {
                            error: "attempt already terminal".to_string(),
                        }
                    }
                    Err(e) => {
                        metrics.refreshes_failed.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(
                            key = %token,
                            error = %e,
                            "Failed to record refresh completion"
                        );
                        RefreshDisposition::Failed {
                            error: e.to_string(),
                        }
                    }
                }
            }
            Err(e) => {
                metrics.refreshes_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(key = %token, error = %e, "Failed to persist fetched data");
                fail_claim(&*store, claim, e.to_string(), clock.now(), &token).await;
                RefreshDisposition::Failed {
                    error: e.to_string(),
                }
            }
        },
        Err(e) => {
            metrics.refreshes_failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key = %token, error = %e, "Refresh fetch failed");
            fail_claim(&*store, claim, e.to_string(), clock.now(), &token).await;
            RefreshDisposition::Failed {
                error: e.to_string(),
            }
        }
    }
}

/// Persist everything a fetch produced. Facts first so the next freshness
/// decision sees the new activity even if a record write fails midway.
async fn persist_payload<S>(store: &S, payload: &FetchPayload) -> Result<u64, StorageError>
where
    S: FreshetStore + Send + Sync,
{
    store.upsert_facts(&payload.facts).await?;
    for record in &payload.records {
        store.upsert_record(record).await?;
    }
    Ok(payload.item_count())
}

async fn fail_claim<S>(store: &S, claim: Claim, error: String, now: Timestamp, token: &str)
where
    S: FreshetStore + Send + Sync,
{
    if let Err(e) = store
        .complete(claim, RefreshOutcome::Failed { error }, now)
        .await
    {
        tracing::error!(key = %token, error = %e, "Failed to record refresh failure");
    }
}

// ============================================================================
// TESTS
// ============================================================================
