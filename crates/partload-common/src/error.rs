//! Error types for partload

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for partload operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Main error type for partload
#[derive(Error, Debug)]
pub enum IngestError {
    /// A function was called outside its contract (e.g. zero partitions)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The job configuration could not be loaded or failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A source query failed for one worker's range
    #[error("Source query failed for '{source_name}' worker {worker} (range start={start}, size={size}): {message}")]
    SourceQuery {
        source_name: String,
        worker: usize,
        start: u64,
        size: u64,
        message: String,
    },

    /// The whole extraction matched no rows
    #[error("Source '{source_name}' produced no data; check the source query")]
    EmptyResult { source_name: String },

    #[error("Checkpoint I/O failed at {}: {source}", path.display())]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint at {} is corrupt: {content:?}", path.display())]
    CheckpointCorrupt { path: PathBuf, content: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IngestError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn checkpoint_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CheckpointIo {
            path: path.into(),
            source,
        }
    }

    /// Whether the error only affects a single worker's range.
    ///
    /// Worker-scoped errors leave the other ranges running; everything else
    /// aborts the job.
    pub fn is_worker_scoped(&self) -> bool {
        matches!(
            self,
            Self::SourceQuery { .. } | Self::CheckpointIo { .. } | Self::CheckpointCorrupt { .. }
        )
    }
}
