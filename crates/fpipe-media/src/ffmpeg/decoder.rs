//! Decoding through an `ffmpeg` child process.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use fpipe_models::{RawFrame, SourceInfo};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::probe::probe_video;
use crate::error::{MediaError, MediaResult};
use crate::source::FrameSource;

/// Streams RGB24 frames from `ffmpeg -f rawvideo` stdout.
#[derive(Debug)]
pub struct FfmpegFrameSource {
    info: SourceInfo,
    frame_len: usize,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
}

impl FfmpegFrameSource {
    /// Probe `path` and start decoding it.
    pub async fn open(path: &Path) -> MediaResult<Self> {
        let probe = probe_video(path).await?;
        super::check_ffmpeg()?;

        debug!(
            "Decoding {} ({}x{} displayed, rotation {}, {:?} fps, {:?} frames)",
            path.display(),
            probe.width,
            probe.height,
            probe.rotation,
            probe.fps,
            probe.frame_count
        );

        let mut command = Command::new("ffmpeg");
        command
            .args(["-nostdin", "-v", "error", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"]);

        // ffmpeg autorotates, so frames arrive in the probed display orientation
        Self::spawn(
            command,
            SourceInfo {
                width: probe.width,
                height: probe.height,
                fps: probe.fps,
                frame_count_hint: probe.frame_count,
            },
        )
    }

    /// Start a decoder process writing `info`-sized RGB24 frames to stdout.
    fn spawn(mut command: Command, info: SourceInfo) -> MediaResult<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take().map(super::drain_stderr);

        Ok(Self {
            frame_len: RawFrame::rgb24_len(info.width, info.height),
            info,
            child: Some(child),
            stdout,
            stderr,
        })
    }

    /// Frame rate to report when the container has none.
    pub fn set_fallback_fps(&mut self, fps: f64) {
        if self.info.fps.is_none() {
            self.info.fps = Some(fps);
        }
    }

    /// Reap the child after stdout hit EOF and turn a bad exit into an error.
    async fn finish_child(&mut self) -> MediaResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().await?;
        let stderr = self.stderr.take();
        if status.success() {
            return Ok(());
        }
        Err(super::exit_error(
            "FFmpeg decoder",
            super::stderr_tail(stderr).await,
            status.code(),
        ))
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    fn info(&self) -> SourceInfo {
        self.info.clone()
    }

    async fn next_frame(&mut self) -> MediaResult<Option<RawFrame>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; self.frame_len];
        let mut filled = 0;
        while filled < self.frame_len {
            let n = stdout.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == self.frame_len {
            return Ok(Some(RawFrame::new(self.info.width, self.info.height, buf)));
        }

        self.stdout = None;
        self.finish_child()
            .await
            .map_err(|e| MediaError::decode(e.to_string()))?;

        if filled == 0 {
            Ok(None)
        } else {
            Err(MediaError::decode(format!(
                "truncated frame: {} of {} bytes",
                filled, self.frame_len
            )))
        }
    }

    async fn close(&mut self) {
        self.stdout = None;
        self.stderr = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to stop FFmpeg decoder: {}", e);
            }
        }
    }
}
