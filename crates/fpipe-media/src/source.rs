//! Frame source trait.

use async_trait::async_trait;
use fpipe_models::{RawFrame, SourceInfo};

use crate::error::MediaResult;

/// Decodes a video into an ordered sequence of raw frames.
///
/// `next_frame` returns `Ok(None)` at end-of-stream. Sources are driven by a
/// single producer task, so they only need to be `Send`.
#[async_trait]
pub trait FrameSource: Send {
    /// Properties known before the first frame is decoded.
    fn info(&self) -> SourceInfo;

    /// Decode the next frame in presentation order.
    async fn next_frame(&mut self) -> MediaResult<Option<RawFrame>>;

    /// Release decoder resources. Called once when the producer stops.
    async fn close(&mut self) {}
}
