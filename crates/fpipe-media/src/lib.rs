//! Media collaborators for the frame pipeline.
//!
//! The pipeline treats decoding, the per-frame transform and encoding as
//! opaque services. This crate provides:
//! - The `FrameSource`, `FrameTransform` and `VideoEncoder` traits
//! - In-memory implementations for embedding and tests
//! - An FFmpeg CLI backend (rawvideo pipes in and out of `ffmpeg`)

pub mod backend;
pub mod encoder;
pub mod error;
pub mod ffmpeg;
pub mod memory;
pub mod source;
pub mod transform;

pub use backend::MediaBackend;
pub use encoder::{ArtifactData, EncodeSettings, EncoderSession, VideoArtifact, VideoEncoder};
pub use error::{MediaError, MediaResult};
pub use ffmpeg::FfmpegBackend;
pub use memory::{MemoryBackend, MemoryEncoder, MemoryFrameSource};
pub use source::FrameSource;
pub use transform::{FrameTransform, PassthroughTransform};
