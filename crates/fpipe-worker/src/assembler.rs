//! Encode the result store into the output video.

use std::sync::Arc;

use fpipe_media::{EncodeSettings, VideoArtifact, VideoEncoder};
use fpipe_queue::ResultStore;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};

/// Feeds stored frames to an encoder in index order.
#[derive(Clone)]
pub struct VideoAssembler {
    encoder: Arc<dyn VideoEncoder>,
}

impl VideoAssembler {
    pub fn new(encoder: Arc<dyn VideoEncoder>) -> Self {
        Self { encoder }
    }

    /// Encode frames `0..total` into one artifact. The store is only read.
    pub async fn assemble(
        &self,
        store: &ResultStore,
        total: u64,
        fps: f64,
    ) -> PipelineResult<VideoArtifact> {
        if total == 0 {
            return Err(PipelineError::assembly("no frames to assemble"));
        }
        let frames = store
            .ordered(total)
            .map_err(|e| PipelineError::assembly(e.to_string()))?;

        let first = frames
            .first()
            .ok_or_else(|| PipelineError::assembly("no frames to assemble"))?;
        let settings = EncodeSettings {
            width: first.width,
            height: first.height,
            fps,
        };
        info!(
            "Assembling {} frames at {}x{} {:.2} fps",
            total, settings.width, settings.height, settings.fps
        );

        let mut session = self
            .encoder
            .begin(settings)
            .await
            .map_err(|e| PipelineError::assembly(e.to_string()))?;

        for frame in &frames {
            session
                .write_frame(frame)
                .await
                .map_err(|e| PipelineError::assembly(format!("frame {}: {}", frame.index, e)))?;
        }

        let artifact = session
            .finish()
            .await
            .map_err(|e| PipelineError::assembly(e.to_string()))?;
        debug!("Encoder produced {} frames", artifact.frame_count);
        Ok(artifact)
    }
}
