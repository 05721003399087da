//! In-memory collaborators.
//!
//! Used when frames are already resident (embedding, tests) and as a
//! rawvideo backend: an uploaded file is read as packed RGB24 frames of a
//! fixed size.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fpipe_models::{Frame, FrameIndex, RawFrame, SourceInfo};
use tracing::debug;

use crate::backend::MediaBackend;
use crate::encoder::{ArtifactData, EncodeSettings, EncoderSession, VideoArtifact, VideoEncoder};
use crate::error::{MediaError, MediaResult};
use crate::source::FrameSource;

/// Frame source over a list of resident frames.
#[derive(Debug)]
pub struct MemoryFrameSource {
    info: SourceInfo,
    frames: VecDeque<RawFrame>,
    /// Fail instead of yielding the frame at this position
    fail_at: Option<(u64, String)>,
    yielded: u64,
    closed: bool,
}

impl MemoryFrameSource {
    pub fn new(info: SourceInfo, frames: Vec<RawFrame>) -> Self {
        Self {
            info,
            frames: frames.into(),
            fail_at: None,
            yielded: 0,
            closed: false,
        }
    }

    /// `count` solid frames of `width`x`height`; frame `i` is filled with byte `i % 256`.
    pub fn solid(width: u32, height: u32, count: u64) -> Self {
        let len = RawFrame::rgb24_len(width, height);
        let frames = (0..count)
            .map(|i| RawFrame::new(width, height, vec![(i % 256) as u8; len]))
            .collect();
        Self::new(
            SourceInfo {
                width,
                height,
                fps: Some(30.0),
                frame_count_hint: Some(count),
            },
            frames,
        )
    }

    /// Report a decode error when frame `index` is requested.
    pub fn fail_at(mut self, index: u64, message: impl Into<String>) -> Self {
        self.fail_at = Some((index, message.into()));
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl FrameSource for MemoryFrameSource {
    fn info(&self) -> SourceInfo {
        self.info.clone()
    }

    async fn next_frame(&mut self) -> MediaResult<Option<RawFrame>> {
        if self.closed {
            return Ok(None);
        }
        if let Some((index, message)) = &self.fail_at {
            if *index == self.yielded {
                return Err(MediaError::decode(message.clone()));
            }
        }
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.yielded += 1;
        }
        Ok(frame)
    }

    async fn close(&mut self) {
        self.closed = true;
        self.frames.clear();
    }
}

#[derive(Debug, Default)]
struct EncoderLog {
    written: Vec<FrameIndex>,
    failure: Option<String>,
    sessions: u32,
}

/// Encoder that concatenates frame payloads into a byte artifact.
///
/// Clones share the same log, so a test can keep a handle while the
/// pipeline owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryEncoder {
    log: Arc<Mutex<EncoderLog>>,
}

impl MemoryEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sessions fail with `message`; `None` restores normal operation.
    pub fn set_failure(&self, message: Option<String>) {
        self.lock().failure = message;
    }

    /// Indices written by the most recent session, in write order.
    pub fn written_indices(&self) -> Vec<FrameIndex> {
        self.lock().written.clone()
    }

    /// Number of sessions opened so far.
    pub fn sessions(&self) -> u32 {
        self.lock().sessions
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EncoderLog> {
        // A panicking test thread must not wedge the other assertions.
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl VideoEncoder for MemoryEncoder {
    async fn begin(&self, settings: EncodeSettings) -> MediaResult<Box<dyn EncoderSession>> {
        let mut log = self.lock();
        log.sessions += 1;
        log.written.clear();
        debug!(
            "Memory encoder session {} at {}x{} {:.2} fps",
            log.sessions, settings.width, settings.height, settings.fps
        );
        Ok(Box::new(MemoryEncoderSession {
            encoder: self.clone(),
            buffer: Vec::new(),
            frames: 0,
        }))
    }
}

struct MemoryEncoderSession {
    encoder: MemoryEncoder,
    buffer: Vec<u8>,
    frames: u64,
}

#[async_trait]
impl EncoderSession for MemoryEncoderSession {
    async fn write_frame(&mut self, frame: &Frame) -> MediaResult<()> {
        let mut log = self.encoder.lock();
        if let Some(message) = &log.failure {
            return Err(MediaError::encode(message.clone()));
        }
        log.written.push(frame.index);
        self.buffer.extend_from_slice(&frame.data);
        self.frames += 1;
        Ok(())
    }

    async fn finish(&mut self) -> MediaResult<VideoArtifact> {
        if let Some(message) = &self.encoder.lock().failure {
            return Err(MediaError::encode(message.clone()));
        }
        Ok(VideoArtifact {
            data: ArtifactData::Bytes(std::mem::take(&mut self.buffer)),
            frame_count: self.frames,
            content_type: "application/octet-stream".to_string(),
        })
    }
}

/// Backend reading uploads as headerless RGB24 frames of a fixed size.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    width: u32,
    height: u32,
    fps: f64,
    encoder: MemoryEncoder,
}

impl MemoryBackend {
    pub fn rawvideo(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            encoder: MemoryEncoder::new(),
        }
    }

    /// Handle onto the encoder used for assembly.
    pub fn memory_encoder(&self) -> MemoryEncoder {
        self.encoder.clone()
    }
}

#[async_trait]
impl MediaBackend for MemoryBackend {
    async fn open_source(&self, path: &Path) -> MediaResult<Box<dyn FrameSource>> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        let bytes = tokio::fs::read(path).await?;
        let frame_len = RawFrame::rgb24_len(self.width, self.height);
        if frame_len == 0 {
            return Err(MediaError::InvalidVideo("zero frame size".to_string()));
        }

        let whole = bytes.len() / frame_len;
        let frames = bytes
            .chunks_exact(frame_len)
            .map(|chunk| RawFrame::new(self.width, self.height, chunk.to_vec()))
            .collect();

        let mut source = MemoryFrameSource::new(
            SourceInfo {
                width: self.width,
                height: self.height,
                fps: Some(self.fps),
                frame_count_hint: Some(whole as u64),
            },
            frames,
        );
        let trailing = bytes.len() % frame_len;
        if trailing != 0 {
            source = source.fail_at(
                whole as u64,
                format!("truncated frame: {} of {} bytes", trailing, frame_len),
            );
        }
        Ok(Box::new(source))
    }

    fn encoder(&self, _output_dir: &Path) -> Arc<dyn VideoEncoder> {
        Arc::new(self.encoder.clone())
    }
}
