//! Worker error types.

use std::time::Duration;

use imgtier_media::MediaError;
use imgtier_models::{ImageId, QualityLevel};
use imgtier_queue::QueueError;
use imgtier_storage::StorageError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to fetch original of {id}: {source}")]
    FetchOriginal { id: ImageId, source: StorageError },

    #[error("Failed to generate variants of {id}: {source}")]
    Variants { id: ImageId, source: MediaError },

    #[error("Failed to persist quality {quality} of {id}: {source}")]
    Persist {
        id: ImageId,
        quality: QualityLevel,
        source: StorageError,
    },

    #[error("Task {id} did not finish within {timeout:?}")]
    Timeout { id: ImageId, timeout: Duration },

    #[error("Codec task for {id} aborted: {message}")]
    CodecAborted { id: ImageId, message: String },

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl WorkerError {
    /// Processing stage the error came from, for logs and metrics labels.
    pub fn stage(&self) -> &'static str {
        match self {
            WorkerError::FetchOriginal { .. } => "fetch",
            WorkerError::Variants { .. } | WorkerError::CodecAborted { .. } => "transcode",
            WorkerError::Persist { .. } => "persist",
            WorkerError::Timeout { .. } => "timeout",
            WorkerError::Metrics(_) => "metrics",
            WorkerError::Queue(_) => "queue",
        }
    }
}
