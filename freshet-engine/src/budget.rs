//! Upstream fetch budget: a concurrency cap plus an optional rate limit.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::{Quota, RateLimiter};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use freshet_core::{EntityKey, FetchError};

/// Type alias for the rate limiter we use.
type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

/// Shared budget every refresh worker draws from before touching the
/// upstream. The semaphore caps in-flight fetches; the limiter smooths
/// the request rate across all entities.
pub struct FetchBudget {
    semaphore: Arc<Semaphore>,
    limiter: Option<DirectRateLimiter>,
}

impl FetchBudget {
    /// Create a budget with a concurrency cap and an optional per-minute
    /// rate with burst allowance.
    pub fn new(max_concurrent: usize, per_minute: Option<u32>, burst: u32) -> Self {
        let limiter = per_minute.and_then(NonZeroU32::new).map(|rate| {
            let quota = Quota::per_minute(rate)
                .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN));
            RateLimiter::direct(quota)
        });

        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            limiter,
        }
    }

    /// Wait for a fetch slot: a semaphore permit first, then the rate
    /// limiter. The permit is held for the duration of the fetch.
    pub async fn acquire(&self, key: &EntityKey) -> Result<OwnedSemaphorePermit, FetchError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Cancelled {
                key: key.storage_token(),
                reason: "fetch budget closed".to_string(),
            })?;

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        Ok(permit)
    }

    /// Currently available fetch slots.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl std::fmt::Debug for FetchBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchBudget")
            .field("available_slots", &self.available_slots())
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
