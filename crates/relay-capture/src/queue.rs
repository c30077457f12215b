//! Task queue store
//!
//! One append-only segment file per task identity holding newline-delimited
//! change records. The capture path appends, the delivery path drains; both
//! go through the segment's own lock so an append lands entirely before or
//! entirely after a drain boundary.

use bytes::Bytes;
use relay_core::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Owned, lock-guarded queue segment for one task identity
pub struct QueueSegment {
    task: TaskIdentity,
    path: PathBuf,
    fsync: bool,
    handle: Mutex<Option<File>>,
}

impl QueueSegment {
    fn new(task: TaskIdentity, dir: &Path, fsync: bool) -> Self {
        let path = dir.join(task.segment_file_name());
        Self {
            task,
            path,
            fsync,
            handle: Mutex::new(None),
        }
    }

    pub fn task(&self) -> &TaskIdentity {
        &self.task
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open_append(&self) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| RelayError::queue(&self.task, "Failed to open segment", e))
    }

    /// Append one complete, newline-terminated record.
    ///
    /// A failed write is rolled back to the previous length so the segment
    /// never holds a partial record.
    pub async fn append(&self, line: &[u8]) -> Result<()> {
        if line.last() != Some(&b'\n') {
            return Err(RelayError::invalid_record(
                "queue lines must be newline-terminated",
            ));
        }

        let mut guard = self.handle.lock().await;
        let mut file = match guard.take() {
            Some(file) => file,
            None => self.open_append().await?,
        };

        let len_before = file
            .metadata()
            .await
            .map_err(|e| RelayError::queue(&self.task, "Failed to stat segment", e))?
            .len();

        if let Err(e) = self.write_line(&mut file, line).await {
            if let Err(rollback) = file.set_len(len_before).await {
                warn!(task = %self.task, error = %rollback, "Failed to roll back partial append");
            }
            // Handle is dropped; the next append reopens it.
            return Err(RelayError::queue(&self.task, "Failed to append record", e));
        }

        *guard = Some(file);
        Ok(())
    }

    async fn write_line(&self, file: &mut File, line: &[u8]) -> std::io::Result<()> {
        file.write_all(line).await?;
        file.flush().await?;
        if self.fsync {
            file.sync_data().await?;
        }
        Ok(())
    }

    /// Close the append handle, read everything, truncate.
    ///
    /// Returns empty bytes when the segment file does not exist yet. If the
    /// truncate fails nothing is returned, so the content is served again on
    /// the next drain. Once truncated the data is always returned; the handle
    /// stays closed and the next append reopens it.
    pub async fn drain_and_reset(&self) -> Result<Bytes> {
        let mut guard = self.handle.lock().await;

        if let Some(mut file) = guard.take() {
            file.flush()
                .await
                .map_err(|e| RelayError::queue(&self.task, "Failed to flush segment", e))?;
        }

        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Bytes::new());
            }
            Err(e) => return Err(RelayError::queue(&self.task, "Failed to read segment", e)),
        };

        if !data.is_empty() {
            let truncated = File::create(&self.path)
                .await
                .map_err(|e| RelayError::queue(&self.task, "Failed to truncate segment", e))?;
            if self.fsync {
                truncated
                    .sync_all()
                    .await
                    .map_err(|e| RelayError::queue(&self.task, "Failed to sync truncation", e))?;
            }
        }

        debug!(task = %self.task, bytes = data.len(), "Drained segment");
        Ok(Bytes::from(data))
    }
}

/// Registry of queue segments keyed by task identity.
///
/// The map lock is held only to find or insert a segment; segment I/O runs
/// under the per-segment lock, so unrelated tasks drain in parallel.
pub struct TaskQueueStore {
    dir: PathBuf,
    fsync: bool,
    segments: RwLock<HashMap<TaskIdentity, Arc<QueueSegment>>>,
}

impl TaskQueueStore {
    pub fn new(dir: impl Into<PathBuf>, fsync: bool) -> Self {
        Self {
            dir: dir.into(),
            fsync,
            segments: RwLock::new(HashMap::new()),
        }
    }

    /// Create the queue directory and register the given subscriptions
    pub async fn open(
        dir: impl Into<PathBuf>,
        fsync: bool,
        tasks: impl IntoIterator<Item = TaskIdentity>,
    ) -> Result<Self> {
        let store = Self::new(dir, fsync);
        fs::create_dir_all(&store.dir).await.map_err(|e| {
            RelayError::queue(store.dir.display(), "Failed to create queue directory", e)
        })?;

        for task in tasks {
            store.register(task).await?;
        }

        info!(
            dir = ?store.dir,
            segments = store.segments.read().await.len(),
            "Task queue store opened"
        );
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a task identity, returning its segment
    pub async fn register(&self, task: TaskIdentity) -> Result<Arc<QueueSegment>> {
        task.validate()?;

        if let Some(segment) = self.segments.read().await.get(&task) {
            return Ok(segment.clone());
        }

        let mut segments = self.segments.write().await;
        let segment = segments
            .entry(task.clone())
            .or_insert_with(|| Arc::new(QueueSegment::new(task, &self.dir, self.fsync)))
            .clone();
        Ok(segment)
    }

    /// Delivery-side identity lookup
    pub async fn lookup(&self, task: &TaskIdentity) -> Option<Arc<QueueSegment>> {
        self.segments.read().await.get(task).cloned()
    }

    /// Registered task identities, sorted
    pub async fn tasks(&self) -> Vec<TaskIdentity> {
        let mut tasks: Vec<_> = self.segments.read().await.keys().cloned().collect();
        tasks.sort();
        tasks
    }

    /// Append a record line to a task's segment, creating it if needed
    pub async fn append(&self, task: &TaskIdentity, line: &[u8]) -> Result<()> {
        let segment = match self.lookup(task).await {
            Some(segment) => segment,
            None => self.register(task.clone()).await?,
        };
        segment.append(line).await
    }

    /// Drain a task's segment; unknown tasks yield empty content
    pub async fn drain_and_reset(&self, task: &TaskIdentity) -> Result<Bytes> {
        match self.lookup(task).await {
            Some(segment) => segment.drain_and_reset().await,
            None => Ok(Bytes::new()),
        }
    }
}
