//! Video encoder trait and output artifact.

use std::path::PathBuf;

use async_trait::async_trait;
use fpipe_models::Frame;
use serde::{Deserialize, Serialize};

use crate::error::MediaResult;

/// Output stream parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeSettings {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Where the encoded video lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactData {
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// One encoded output video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoArtifact {
    pub data: ArtifactData,
    pub frame_count: u64,
    pub content_type: String,
}

impl VideoArtifact {
    /// Load the artifact contents.
    pub async fn read_bytes(&self) -> MediaResult<Vec<u8>> {
        match &self.data {
            ArtifactData::File(path) => Ok(tokio::fs::read(path).await?),
            ArtifactData::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    /// Remove any backing file.
    pub async fn discard(&self) -> MediaResult<()> {
        if let ArtifactData::File(path) = &self.data {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Factory for encoder sessions.
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    /// Open a session that accepts frames in output order.
    async fn begin(&self, settings: EncodeSettings) -> MediaResult<Box<dyn EncoderSession>>;
}

/// A single encode in progress.
#[async_trait]
pub trait EncoderSession: Send {
    /// Append the next frame of the output video.
    async fn write_frame(&mut self, frame: &Frame) -> MediaResult<()>;

    /// Flush and return the artifact. The session is unusable afterwards.
    async fn finish(&mut self) -> MediaResult<VideoArtifact>;
}
