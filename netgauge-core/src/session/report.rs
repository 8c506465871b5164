//! What a finished run returns

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::AggregateResult;
use crate::network::{NetworkContext, Subject};
use crate::provider::ProviderAttempt;
use crate::store::{PersistOutcome, StoredId, StoredResult};

/// Outcome of a completed session, carried by the terminal `completed` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementReport {
    pub session_id: Uuid,
    pub test_id: Uuid,
    pub subject: Subject,
    pub network: NetworkContext,
    pub result: AggregateResult,
    pub persisted: bool,
    pub stored_id: Option<StoredId>,
    pub attempted_providers: Vec<ProviderAttempt>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl MeasurementReport {
    pub fn new(record: StoredResult, outcome: PersistOutcome) -> Self {
        Self {
            session_id: record.session_id,
            test_id: record.test_id,
            subject: record.subject,
            network: record.network,
            result: record.result,
            persisted: outcome.persisted,
            stored_id: outcome.stored_id,
            attempted_providers: record.attempted_providers,
            cancelled: record.cancelled,
            started_at: record.started_at,
            finished_at: record.finished_at,
        }
    }

    /// Failed provider attempts across all phases
    pub fn failed_attempts(&self) -> usize {
        self.attempted_providers
            .iter()
            .filter(|a| a.is_failure())
            .count()
    }
}
