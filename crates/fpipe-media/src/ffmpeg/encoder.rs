//! Encoding through an `ffmpeg` child process.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use fpipe_models::Frame;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::encoder::{ArtifactData, EncodeSettings, EncoderSession, VideoArtifact, VideoEncoder};
use crate::error::{MediaError, MediaResult};

/// Writes H.264 MP4 files into an output directory.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    output_dir: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }
}

/// Arguments reading rawvideo from stdin and writing `output`.
fn encode_args(settings: &EncodeSettings, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "-s".to_string(),
        format!("{}x{}", settings.width, settings.height),
        "-r".to_string(),
        format!("{:.3}", settings.fps),
        "-i".to_string(),
        "pipe:0".to_string(),
        // yuv420p needs even dimensions
        "-vf".to_string(),
        "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn begin(&self, settings: EncodeSettings) -> MediaResult<Box<dyn EncoderSession>> {
        super::check_ffmpeg()?;
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let output = self
            .output_dir
            .join(format!("output_{}.mp4", Uuid::new_v4()));
        let args = encode_args(&settings, &output);
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut command = Command::new("ffmpeg");
        command.args(&args);
        let session = FfmpegEncoderSession::spawn(command, settings, output)?;
        Ok(Box::new(session))
    }
}

/// One running encode. Dropped before a successful `finish`, it kills the
/// child and removes the partial output.
struct FfmpegEncoderSession {
    settings: EncodeSettings,
    output: PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    frames: u64,
    completed: bool,
}

impl FfmpegEncoderSession {
    fn spawn(mut command: Command, settings: EncodeSettings, output: PathBuf) -> MediaResult<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child.stdin.take();
        let stderr = child.stderr.take().map(super::drain_stderr);

        Ok(Self {
            settings,
            output,
            child: Some(child),
            stdin,
            stderr,
            frames: 0,
            completed: false,
        })
    }
}

impl Drop for FfmpegEncoderSession {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
        match std::fs::remove_file(&self.output) {
            Ok(()) => debug!("Removed partial output {}", self.output.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove partial output {}: {}",
                self.output.display(),
                e
            ),
        }
    }
}

#[async_trait]
impl EncoderSession for FfmpegEncoderSession {
    async fn write_frame(&mut self, frame: &Frame) -> MediaResult<()> {
        let expected = fpipe_models::RawFrame::rgb24_len(self.settings.width, self.settings.height);
        if frame.data.len() != expected {
            return Err(MediaError::FrameSize {
                expected,
                actual: frame.data.len(),
            });
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::encode("encoder session already finished"))?;
        stdin
            .write_all(&frame.data)
            .await
            .map_err(|e| MediaError::encode(format!("FFmpeg stdin closed: {}", e)))?;
        self.frames += 1;
        Ok(())
    }

    async fn finish(&mut self) -> MediaResult<VideoArtifact> {
        // closing stdin signals end of input
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await.ok();
        }
        let mut child = self
            .child
            .take()
            .ok_or_else(|| MediaError::encode("encoder session already finished"))?;

        let status = child.wait().await?;
        let stderr = super::stderr_tail(self.stderr.take()).await;
        if !status.success() {
            return Err(super::exit_error("FFmpeg encoder", stderr, status.code()));
        }
        self.completed = true;

        info!(
            "Encoded {} frames into {}",
            self.frames,
            self.output.display()
        );
        Ok(VideoArtifact {
            data: ArtifactData::File(self.output.clone()),
            frame_count: self.frames,
            content_type: "video/mp4".to_string(),
        })
    }
}
