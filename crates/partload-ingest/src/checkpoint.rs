//! Per-worker checkpoint storage
//!
//! A checkpoint is the absolute source offset a worker is about to read
//! from. Each worker owns exactly one checkpoint per source, stored at
//! `{root}/{source}.{worker}`, so concurrent workers never contend.
//! Checkpoints are never deleted here; cleaning them up is an operator task.

use async_trait::async_trait;
use partload_common::{IngestError, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Durable storage for worker resume offsets
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last persisted offset for `(source, worker)`, if any
    async fn read_offset(&self, source: &str, worker: usize) -> Result<Option<u64>>;

    /// Persist `offset` for `(source, worker)`.
    ///
    /// Must not return before the value is durable.
    async fn write_offset(&self, source: &str, worker: usize, offset: u64) -> Result<()>;
}

/// Checkpoints stored as small text files under a root directory
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{source}.{worker}`
    pub fn path_for(&self, source: &str, worker: usize) -> PathBuf {
        self.root.join(format!("{}.{}", source, worker))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn read_offset(&self, source: &str, worker: usize) -> Result<Option<u64>> {
        let path = self.path_for(source, worker);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IngestError::checkpoint_io(path, e)),
        };

        content
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| IngestError::CheckpointCorrupt { path, content })
    }

    async fn write_offset(&self, source: &str, worker: usize, offset: u64) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| IngestError::checkpoint_io(&self.root, e))?;

        let path = self.path_for(source, worker);
        let tmp = self.root.join(format!(".{}.{}.tmp", source, worker));

        // write + fsync a sibling, then rename over the checkpoint
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| IngestError::checkpoint_io(&tmp, e))?;
        file.write_all(offset.to_string().as_bytes())
            .await
            .map_err(|e| IngestError::checkpoint_io(&tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| IngestError::checkpoint_io(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| IngestError::checkpoint_io(&path, e))?;

        tracing::trace!(source, worker, offset, path = %path.display(), "Checkpoint written");
        Ok(())
    }
}
