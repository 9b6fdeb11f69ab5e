//! Component error taxonomy. Each error is handled where it is detected
//! and translated into a placeholder result or a request failure; none of
//! these may tear down the publishing task.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The camera cannot be opened or has stopped producing frames.
    /// Callers serve a placeholder and re-attempt on a timer.
    #[error("camera unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported capture format: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CaptureError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no frames in requested window")]
    Empty,

    #[error("encoder exited with {status}: {stderr}")]
    Encoder { status: String, stderr: String },

    #[error("encoder timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no frame has been published yet")]
    NoFrame,

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
