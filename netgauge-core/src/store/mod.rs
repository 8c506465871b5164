//! Result persistence
//!
//! [`ResultStore`] is the persistence boundary. Writes are idempotent on the
//! test id, so a save retried after an ambiguous transient failure never
//! produces a second record. [`persist_with_retry`] wraps any store with
//! bounded retry and reconnect.

mod file;
mod memory;
mod retry;

pub use file::JsonFileStore;
pub use memory::MemoryResultStore;
pub use retry::{PersistOutcome, RetryPolicy, persist_with_retry};

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::AggregateResult;
use crate::error::StoreError;
use crate::network::{NetworkContext, Subject};
use crate::provider::ProviderAttempt;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Identifier the store assigned to a saved record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredId(pub String);

impl fmt::Display for StoredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The persisted form of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResult {
    pub test_id: Uuid,
    pub session_id: Uuid,
    pub subject: Subject,
    pub network: NetworkContext,
    pub result: AggregateResult,
    pub attempted_providers: Vec<ProviderAttempt>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Persistence boundary for measurement results
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert or replace the record for `record.test_id`
    async fn save(&self, record: &StoredResult) -> Result<StoredId>;

    /// Re-establish whatever connection the store depends on
    async fn reconnect(&self) -> Result<()>;

    async fn get(&self, test_id: Uuid) -> Result<Option<StoredResult>>;

    /// Records newest first, optionally for one subject
    async fn list(&self, subject_id: Option<&str>) -> Result<Vec<StoredResult>>;
}
