//! Frames flowing through the pipeline.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 0-based position of a frame in decode order.
pub type FrameIndex = u64;

/// Bytes per pixel of the packed RGB24 layout used between stages.
pub const RGB24_BYTES_PER_PIXEL: usize = 3;

/// Decoded image as produced by a frame source, before it is indexed.
#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB24 pixels, row-major
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// Byte length of one RGB24 frame of the given size.
    pub fn rgb24_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * RGB24_BYTES_PER_PIXEL
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// An indexed frame. Owned by exactly one stage at a time.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub index: FrameIndex,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    /// Attach a decode-order index to a raw frame.
    pub fn from_raw(index: FrameIndex, raw: RawFrame) -> Self {
        Self {
            index,
            width: raw.width,
            height: raw.height,
            data: raw.data,
        }
    }

    /// Same index, new pixels.
    pub fn with_data(&self, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            index: self.index,
            width,
            height,
            data,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Properties of a source video known before decoding starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    /// Frames per second, when the container reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    /// Container frame count; may be absent or inaccurate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_count_hint: Option<u64>,
}
