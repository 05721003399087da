//! Pipeline error types.

use std::time::Duration;

use fpipe_models::{FailureKind, FrameIndex, JobState};
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid state: cannot {operation} while job is {state}")]
    InvalidState {
        operation: &'static str,
        state: JobState,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Frame {index} processing failed: {cause}")]
    FrameProcessing { index: FrameIndex, cause: String },

    #[error("Assembly error: {0}")]
    Assembly(String),

    #[error("Pipeline tasks did not stop within {0:?}")]
    CancellationTimeout(Duration),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Media error: {0}")]
    Media(#[from] fpipe_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] fpipe_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn invalid_state(operation: &'static str, state: JobState) -> Self {
        Self::InvalidState { operation, state }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn frame_processing(index: FrameIndex, cause: impl Into<String>) -> Self {
        Self::FrameProcessing {
            index,
            cause: cause.into(),
        }
    }

    pub fn assembly(msg: impl Into<String>) -> Self {
        Self::Assembly(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_upload(msg: impl Into<String>) -> Self {
        Self::InvalidUpload(msg.into())
    }

    /// Job failure category this error is recorded under, if it is job-fatal.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            PipelineError::Decode(_) => Some(FailureKind::Decode),
            PipelineError::FrameProcessing { .. } => Some(FailureKind::FrameProcessing),
            PipelineError::Assembly(_) => Some(FailureKind::Assembly),
            PipelineError::CancellationTimeout(_) => Some(FailureKind::CancellationTimeout),
            _ => None,
        }
    }

    /// Rejected request with no side effect.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, PipelineError::InvalidState { .. })
    }
}
