//! In-memory result store

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Result, ResultStore, StoredId, StoredResult};

/// HashMap-backed store for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    records: RwLock<HashMap<Uuid, StoredResult>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn save(&self, record: &StoredResult) -> Result<StoredId> {
        self.records
            .write()
            .await
            .insert(record.test_id, record.clone());
        Ok(StoredId(record.test_id.to_string()))
    }

    async fn reconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, test_id: Uuid) -> Result<Option<StoredResult>> {
        Ok(self.records.read().await.get(&test_id).cloned())
    }

    async fn list(&self, subject_id: Option<&str>) -> Result<Vec<StoredResult>> {
        let mut records: Vec<StoredResult> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| subject_id.is_none_or(|id| r.subject.subject_id == id))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records)
    }
}
