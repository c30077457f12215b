//! Resume position storage strategies
//!
//! Provides pluggable persistence of the replication stream position for
//! crash recovery.

use async_trait::async_trait;
use relay_core::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Position storage trait (Strategy pattern)
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Load the last saved position, or `ResumePosition::beginning()`
    async fn load(&self) -> Result<ResumePosition>;

    /// Save position, overwriting any prior value
    async fn save(&self, position: &ResumePosition) -> Result<()>;

    /// Persist anything held back
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Get store name
    fn name(&self) -> &'static str;
}

// ============================================================================
// File-based Position Store
// ============================================================================

/// JSON file position storage: `{"name": "mysql-bin.000003", "pos": 120}`
pub struct FilePositionStore {
    path: PathBuf,
    fsync: bool,
    cached: RwLock<Option<ResumePosition>>,
}

impl FilePositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fsync: false,
            cached: RwLock::new(None),
        }
    }

    /// Sync the temp file to disk before it replaces the position file
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    async fn write_temp(&self, temp_path: &Path, body: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(temp_path).await?;
        file.write_all(body).await?;
        file.flush().await?;
        if self.fsync {
            file.sync_data().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PositionStore for FilePositionStore {
    async fn load(&self) -> Result<ResumePosition> {
        match fs::read(&self.path).await {
            Ok(content) => {
                let position: ResumePosition = serde_json::from_slice(&content)
                    .map_err(|e| RelayError::checkpoint("Failed to parse position file", e))?;
                *self.cached.write().await = Some(position.clone());
                info!(position = %position, path = ?self.path, "Loaded resume position");
                Ok(position)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = ?self.path, "No position file, starting from the beginning");
                Ok(ResumePosition::beginning())
            }
            Err(e) => Err(RelayError::checkpoint("Failed to read position file", e)),
        }
    }

    async fn save(&self, position: &ResumePosition) -> Result<()> {
        // Only write if changed
        if self.cached.read().await.as_ref() == Some(position) {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| RelayError::checkpoint("Failed to create position directory", e))?;
        }

        let body = serde_json::to_vec(position)
            .map_err(|e| RelayError::checkpoint("Failed to encode position", e))?;

        // Write atomically via temp file
        let temp_path = self.path.with_extension("tmp");
        self.write_temp(&temp_path, &body)
            .await
            .map_err(|e| RelayError::checkpoint("Failed to write position file", e))?;
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| RelayError::checkpoint("Failed to rename position file", e))?;

        *self.cached.write().await = Some(position.clone());
        debug!(position = %position, "Saved resume position");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file_position"
    }
}

// ============================================================================
// Memory Position Store (for testing)
// ============================================================================

/// In-memory position storage
#[derive(Default)]
pub struct MemoryPositionStore {
    position: RwLock<ResumePosition>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn load(&self) -> Result<ResumePosition> {
        Ok(self.position.read().await.clone())
    }

    async fn save(&self, position: &ResumePosition) -> Result<()> {
        *self.position.write().await = position.clone();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory_position"
    }
}

// ============================================================================
// Batched Position Store (write-behind)
// ============================================================================

/// Persists every `every`-th save to the inner store.
///
/// Widens the replay window after a crash to at most `every - 1` syncs in
/// exchange for fewer writes.
pub struct BatchedPositionStore {
    inner: Arc<dyn PositionStore>,
    state: Mutex<BatchState>,
    every: u64,
}

#[derive(Default)]
struct BatchState {
    pending: Option<ResumePosition>,
    since_flush: u64,
}

impl BatchedPositionStore {
    pub fn new(inner: Arc<dyn PositionStore>, every: u64) -> Self {
        Self {
            inner,
            state: Mutex::new(BatchState::default()),
            every: every.max(1),
        }
    }
}

#[async_trait]
impl PositionStore for BatchedPositionStore {
    async fn load(&self) -> Result<ResumePosition> {
        let position = self.inner.load().await?;
        *self.state.lock().await = BatchState::default();
        Ok(position)
    }

    async fn save(&self, position: &ResumePosition) -> Result<()> {
        let mut state = self.state.lock().await;
        state.pending = Some(position.clone());
        state.since_flush += 1;

        if state.since_flush >= self.every {
            self.inner.save(position).await?;
            state.pending = None;
            state.since_flush = 0;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(position) = state.pending.take() {
            self.inner.save(&position).await?;
            state.since_flush = 0;
        }
        self.inner.flush().await
    }

    fn name(&self) -> &'static str {
        "batched_position"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryPositionStore::new();

        assert!(store.load().await.unwrap().is_beginning());
        let pos = ResumePosition::new("mysql-bin.000001", 100);
        store.save(&pos).await.unwrap();
        assert_eq!(store.load().await.unwrap(), pos);
    }

    #[tokio::test]
    async fn test_file_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("repl-binlog_position.json");

        let store = FilePositionStore::new(&path);
        assert!(store.load().await.unwrap().is_beginning());

        let pos = ResumePosition::new("mysql-bin.000002", 4567);
        store.save(&pos).await.unwrap();
        assert_eq!(store.load().await.unwrap(), pos);

        // Same layout the position file has always had
        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({"name": "mysql-bin.000002", "pos": 4567}));

        // New instance should load persisted value
        let reopened = FilePositionStore::new(&path);
        assert_eq!(reopened.load().await.unwrap(), pos);
    }

    #[tokio::test]
    async fn test_synced_save_replaces_file_without_leftover_temp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pos.json");
        let store = FilePositionStore::new(&path).with_fsync(true);

        store.save(&ResumePosition::new("mysql-bin.000001", 4)).await.unwrap();
        store.save(&ResumePosition::new("mysql-bin.000001", 900)).await.unwrap();

        assert!(!path.with_extension("tmp").exists());
        let reopened = FilePositionStore::new(&path);
        assert_eq!(
            reopened.load().await.unwrap(),
            ResumePosition::new("mysql-bin.000001", 900)
        );
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pos.json");
        std::fs::write(&path, b"not json").unwrap();

        let err = FilePositionStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, RelayError::Checkpoint { .. }));
    }

    #[tokio::test]
    async fn test_batched_store() {
        let inner = Arc::new(MemoryPositionStore::new());
        let store = BatchedPositionStore::new(inner.clone(), 3);
        store.load().await.unwrap();

        store.save(&ResumePosition::new("b.1", 10)).await.unwrap();
        store.save(&ResumePosition::new("b.1", 20)).await.unwrap();
        assert!(inner.load().await.unwrap().is_beginning());

        store.save(&ResumePosition::new("b.1", 30)).await.unwrap();
        assert_eq!(inner.load().await.unwrap(), ResumePosition::new("b.1", 30));

        store.save(&ResumePosition::new("b.1", 40)).await.unwrap();
        store.flush().await.unwrap();
        assert_eq!(inner.load().await.unwrap(), ResumePosition::new("b.1", 40));
    }
}
