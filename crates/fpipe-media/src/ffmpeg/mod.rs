//! FFmpeg CLI backend.
//!
//! Frames cross the process boundary as headerless RGB24 over pipes, so the
//! pipeline never links against codec libraries.

mod decoder;
mod encoder;
mod probe;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio::task::JoinHandle;

use crate::backend::MediaBackend;
use crate::encoder::VideoEncoder;
use crate::error::{MediaError, MediaResult};
use crate::source::FrameSource;

pub use decoder::FfmpegFrameSource;
pub use encoder::FfmpegEncoder;
pub use probe::{probe_video, VideoProbe};

/// Backend decoding uploads and encoding results with the `ffmpeg` binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend {
    /// Fallback frame rate when probing reports none
    default_fps: Option<f64>,
}

impl FfmpegBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_fps(mut self, fps: f64) -> Self {
        self.default_fps = Some(fps);
        self
    }
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    async fn open_source(&self, path: &Path) -> MediaResult<Box<dyn FrameSource>> {
        let mut source = FfmpegFrameSource::open(path).await?;
        if let Some(fps) = self.default_fps {
            source.set_fallback_fps(fps);
        }
        Ok(Box::new(source))
    }

    fn encoder(&self, output_dir: &Path) -> Arc<dyn VideoEncoder> {
        Arc::new(FfmpegEncoder::new(output_dir))
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

/// Lines of ffmpeg diagnostics kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Read a child's stderr until it closes, so a chatty ffmpeg never blocks
/// on a full pipe. Resolves to the last lines written.
fn drain_stderr(stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line).trim_end().to_string();
                    if text.is_empty() {
                        continue;
                    }
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(text);
                }
            }
        }
        Vec::from(tail).join("\n")
    })
}

/// Collected stderr of an exited child; empty if the drain task was lost.
async fn stderr_tail(task: Option<JoinHandle<String>>) -> String {
    match task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    }
}

/// Error for an ffmpeg child that exited unsuccessfully.
fn exit_error(what: &str, stderr: String, code: Option<i32>) -> MediaError {
    let message = match stderr.lines().last() {
        Some(last) => format!("{} exited with non-zero status: {}", what, last),
        None => format!("{} exited with non-zero status", what),
    };
    MediaError::ffmpeg_failed(message, Some(stderr), code)
}
