//! The fetch-and-parse collaborator boundary.

use async_trait::async_trait;

use crate::error::FetchError;
use crate::identity::EntityKey;
use crate::records::{CachedRecord, FilingActivityFact};

/// Everything one upstream fetch produced for an entity: the raw activity
/// facts and the cached payload rows. A refresh may update several periods
/// at once (e.g. around a month boundary), hence a vec of records.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPayload {
    pub facts: Vec<FilingActivityFact>,
    pub records: Vec<CachedRecord>,
}

impl FetchPayload {
    /// Total items this payload carries, recorded on the refresh attempt.
    pub fn item_count(&self) -> u64 {
        (self.facts.len() + self.records.len()) as u64
    }
}

/// Per-domain fetch-and-parse provider, supplied by the caller of the
/// orchestrator. The core treats it as an opaque, possibly slow, possibly
/// failing function; timeouts and cancellation are imposed from outside.
#[async_trait]
pub trait FetchProvider: Send + Sync {
    async fn fetch(&self, key: &EntityKey) -> Result<FetchPayload, FetchError>;
}
