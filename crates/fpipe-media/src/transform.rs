//! Per-frame transform trait.

use async_trait::async_trait;
use fpipe_models::Frame;

use crate::error::MediaResult;

/// Opaque per-frame analysis step, `(Frame) -> Frame'`.
///
/// Shared by every consumer worker, hence `Sync`. Implementations doing heavy
/// CPU work should move it onto `tokio::task::spawn_blocking`.
#[async_trait]
pub trait FrameTransform: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Produce the processed frame. The returned frame must keep `frame.index`.
    async fn apply(&self, frame: &Frame) -> MediaResult<Frame>;
}

/// Returns every frame unchanged.
#[derive(Debug, Clone, Default)]
pub struct PassthroughTransform;

#[async_trait]
impl FrameTransform for PassthroughTransform {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn apply(&self, frame: &Frame) -> MediaResult<Frame> {
        Ok(frame.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpipe_models::RawFrame;

    #[tokio::test]
    async fn test_passthrough_keeps_index_and_pixels() {
        let frame = Frame::from_raw(3, RawFrame::new(1, 1, vec![1, 2, 3]));
        let out = PassthroughTransform.apply(&frame).await.unwrap();
        assert_eq!(out, frame);
    }
}
