//! One JSON document per test id

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Result, ResultStore, StoredId, StoredResult};

/// File-backed store writing `<dir>/<test_id>.json`
///
/// Writes go to a temporary file first and are renamed into place, so a
/// reader never sees a partial document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open a store rooted at `dir`, creating it if missing
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Store rooted at `dir` without touching the filesystem
    ///
    /// Saves fail until the directory exists; `reconnect` tries to create it.
    pub fn deferred(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, test_id: Uuid) -> PathBuf {
        self.dir.join(format!("{test_id}.json"))
    }
}

#[async_trait]
impl ResultStore for JsonFileStore {
    async fn save(&self, record: &StoredResult) -> Result<StoredId> {
        let path = self.path_for(record.test_id);
        let tmp = path.with_extension("json.tmp");

        let content = serde_json::to_vec_pretty(record)?;
        let written = match fs::write(&tmp, content).await {
            Ok(()) => fs::rename(&tmp, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&tmp).await
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temporary file");
            }
            return Err(e.into());
        }

        debug!(path = %path.display(), "Saved result");
        Ok(StoredId(record.test_id.to_string()))
    }

    async fn reconnect(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    async fn get(&self, test_id: Uuid) -> Result<Option<StoredResult>> {
        match fs::read(self.path_for(test_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, subject_id: Option<&str>) -> Result<Vec<StoredResult>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<StoredResult>(&bytes) {
                Ok(record) => {
                    if subject_id.is_none_or(|id| record.subject.subject_id == id) {
                        records.push(record);
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable result"),
            }
        }

        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records)
    }
}
