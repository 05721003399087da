//! Video analysis job pipeline.
//!
//! This crate provides:
//! - Producer task decoding a source into the frame queue
//! - Consumer pool applying the per-frame transform
//! - Job controller owning the state machine, cancellation and purge
//! - Video assembly from the result store
//! - Status polling and the transport-agnostic job service

pub mod assembler;
pub mod config;
pub mod consumer;
pub mod controller;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod producer;
pub mod service;
pub mod status;
pub mod tracker;

pub use assembler::VideoAssembler;
pub use config::PipelineConfig;
pub use consumer::{ConsumerContext, ConsumerPool};
pub use controller::{BufferStats, JobController};
pub use error::{PipelineError, PipelineResult};
pub use logging::JobLogger;
pub use producer::{Producer, ProducerOutcome};
pub use service::{DownloadedVideo, JobService, UploadReceipt, DOWNLOAD_FILE_NAME};
pub use status::StatusReporter;
pub use tracker::{ErrorPolicy, FrameOutcome, JobTracker};
