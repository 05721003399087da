//! Queue error types.

use fpipe_models::FrameIndex;
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Frame {0} already stored")]
    DuplicateIndex(FrameIndex),

    #[error("Frame {0} missing from result store")]
    MissingIndex(FrameIndex),

    #[error("Stale write for generation {write}, store is at generation {current}")]
    StaleGeneration { write: u64, current: u64 },
}
