//! Shared data models for the FramePipe backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, job states and failure causes
//! - Frames flowing through the pipeline
//! - Progress snapshots exposed to polling clients

pub mod frame;
pub mod job;
pub mod status;

// Re-export common types
pub use frame::{Frame, FrameIndex, RawFrame, SourceInfo};
pub use job::{FailureKind, InvalidTransition, Job, JobFailure, JobId, JobState};
pub use status::{ConsumerStatus, ProgressSnapshot};
