//! Media backend: the decode/encode service used by the job service.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::encoder::VideoEncoder;
use crate::error::MediaResult;
use crate::source::FrameSource;

/// Opens uploaded videos and provides the encoder for assembly.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Open a stored video for decoding.
    async fn open_source(&self, path: &Path) -> MediaResult<Box<dyn FrameSource>>;

    /// Encoder writing assembled videos into `output_dir`.
    fn encoder(&self, output_dir: &Path) -> Arc<dyn VideoEncoder>;
}
