//! Bounded retry around a [`ResultStore`]

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::{ResultStore, StoredId, StoredResult};
use crate::config::PersistenceConfig;

/// Fixed-delay retry budget
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    attempts: u32,
}

impl RetryPolicy {
    /// Create a policy allowing `max_attempts` saves in total
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            attempts: 0,
        }
    }

    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self::new(config.max_attempts, config.retry_delay)
    }

    /// Record a failed attempt and get the delay before the next one
    ///
    /// Returns `None` once the budget is spent
    pub fn should_retry(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            None
        } else {
            Some(self.delay)
        }
    }

    /// Failed attempts recorded so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PersistenceConfig::default())
    }
}

/// What happened when persisting a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistOutcome {
    pub persisted: bool,
    pub stored_id: Option<StoredId>,
    /// Save calls made, including the successful one
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Save with retry on transient failure, reconnecting between attempts.
///
/// Never fails: an exhausted budget or a permanent error is reported as
/// `persisted = false`.
#[instrument(skip(store, record, policy), fields(test_id = %record.test_id))]
pub async fn persist_with_retry(
    store: &dyn ResultStore,
    record: &StoredResult,
    mut policy: RetryPolicy,
) -> PersistOutcome {
    let mut attempts = 0;

    loop {
        attempts += 1;
        let error = match store.save(record).await {
            Ok(id) => {
                info!(stored_id = %id, attempts, "Result persisted");
                return PersistOutcome {
                    persisted: true,
                    stored_id: Some(id),
                    attempts,
                    last_error: None,
                };
            }
            Err(e) => e,
        };

        if !error.is_transient() {
            warn!(error = %error, "Permanent store failure, not retrying");
            return PersistOutcome {
                persisted: false,
                stored_id: None,
                attempts,
                last_error: Some(error.to_string()),
            };
        }

        let Some(delay) = policy.should_retry() else {
            warn!(error = %error, attempts, "Giving up on persistence");
            return PersistOutcome {
                persisted: false,
                stored_id: None,
                attempts,
                last_error: Some(error.to_string()),
            };
        };

        warn!(error = %error, attempt = attempts, ?delay, "Transient store failure, retrying");
        tokio::time::sleep(delay).await;

        if let Err(e) = store.reconnect().await {
            warn!(error = %e, "Store reconnect failed");
        }
    }
}
