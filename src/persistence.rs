use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheIndex, RecordStore};
use crate::{unix_now, ProxyError};

/// On-disk form of the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    #[serde(rename = "cache")]
    pub records: CacheIndex,
    #[serde(rename = "timestamp")]
    pub saved_at: f64,
}

impl CacheSnapshot {
    pub fn of(store: &RecordStore) -> Self {
        Self {
            records: store.snapshot(),
            saved_at: unix_now(),
        }
    }
}

/// Reads and writes the snapshot file. Writes are serialized and atomic.
#[derive(Debug)]
pub struct Persistence {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Persistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        PathBuf::from(temp)
    }

    /// Writes to a sibling temp file, then renames it over the snapshot, so
    /// a crash never leaves a partially written snapshot behind.
    pub async fn save(&self, snapshot: &CacheSnapshot) -> Result<(), ProxyError> {
        let _guard = self.write_lock.lock().await;
        self.write(snapshot).await
    }

    /// Saves the contents of `store`, read only once earlier writers are
    /// done so a later save never carries older records.
    pub async fn save_store(&self, store: &RecordStore) -> Result<(), ProxyError> {
        let _guard = self.write_lock.lock().await;
        self.write(&CacheSnapshot::of(store)).await
    }

    /// Callers hold `write_lock`.
    async fn write(&self, snapshot: &CacheSnapshot) -> Result<(), ProxyError> {
        let write_error = |source: io::Error| ProxyError::PersistenceWrite {
            path: self.path.clone(),
            source,
        };

        let data = serde_json::to_vec(snapshot).map_err(|e| write_error(e.into()))?;
        let temp = self.temp_path();

        tokio::fs::write(&temp, &data).await.map_err(write_error)?;
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            tokio::fs::remove_file(&temp).await.ok();
            return Err(write_error(e));
        }

        debug!(
            path = %self.path.display(),
            names = snapshot.records.len(),
            bytes = data.len(),
            "snapshot written"
        );

        Ok(())
    }

    /// `Ok(None)` when there is no snapshot file yet.
    pub async fn try_load(&self) -> Result<Option<CacheSnapshot>, ProxyError> {
        let read_error = |reason: String| ProxyError::PersistenceRead {
            path: self.path.clone(),
            reason,
        };

        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(read_error(e.to_string())),
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| read_error(e.to_string()))
    }

    /// The persisted index, or an empty one if the file is absent or cannot
    /// be read.
    pub async fn load(&self) -> CacheIndex {
        match self.try_load().await {
            Ok(Some(snapshot)) => {
                info!(
                    path = %self.path.display(),
                    names = snapshot.records.len(),
                    saved_at = snapshot.saved_at,
                    "loaded cache snapshot"
                );
                snapshot.records
            }
            Ok(None) => {
                debug!(path = %self.path.display(), "no cache snapshot, starting empty");
                CacheIndex::new()
            }
            Err(e) => {
                warn!(error = %e, "ignoring unreadable cache snapshot, starting empty");
                CacheIndex::new()
            }
        }
    }
}
