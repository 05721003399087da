//! FFprobe stream information.

use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// Properties of the first video stream.
///
/// `width` and `height` are the display dimensions: for a stream rotated by
/// 90 or 270 degrees they are the stored dimensions swapped, matching the
/// frames ffmpeg emits with autorotation.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    /// Clockwise display rotation in degrees (0, 90, 180 or 270)
    pub rotation: u32,
    pub fps: Option<f64>,
    /// `nb_frames` from the container, when present
    pub frame_count: Option<u64>,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    #[serde(default)]
    tags: FfprobeTags,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

impl FfprobeStream {
    /// Rotation from the display matrix, else the legacy `rotate` tag.
    fn rotation(&self) -> u32 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|side| side.rotation)
            // display matrix rotation is counter-clockwise
            .map(|r| -r)
            .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse().ok()))
            .unwrap_or(0.0);
        ((degrees.round() as i64).rem_euclid(360)) as u32
    }
}

/// Probe a video file for its first video stream.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoProbe> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    super::check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-select_streams",
            "v:0",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: "FFprobe failed".to_string(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_probe(&output.stdout)
}

fn parse_probe(json: &[u8]) -> MediaResult<VideoProbe> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))?;

    let (stored_width, stored_height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(MediaError::InvalidVideo(
                "Video stream has no dimensions".to_string(),
            ))
        }
    };
    let rotation = stream.rotation();
    let (width, height) = match rotation {
        90 | 270 => (stored_height, stored_width),
        _ => (stored_width, stored_height),
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate));

    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0);

    Ok(VideoProbe {
        width,
        height,
        rotation,
        fps,
        frame_count,
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97"). "0/0" yields `None`.
fn parse_frame_rate(s: &str) -> Option<f64> {
    let rate = if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num / den
    } else {
        s.parse().ok()?
    };
    (rate > 0.0).then_some(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "width": 1280, "height": 720,
                 "r_frame_rate": "30/1", "avg_frame_rate": "0/0", "nb_frames": "300"}
            ]
        }"#;
        let probe = parse_probe(json).unwrap();
        assert_eq!(probe.width, 1280);
        assert_eq!(probe.height, 720);
        assert_eq!(probe.frame_count, Some(300));
        assert_eq!(probe.rotation, 0);
        assert!((probe.fps.unwrap() - 30.0).abs() < 0.01);
    }

    #[test]
    fn test_parse_probe_rotated_stream_reports_display_size() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "width": 1920, "height": 1080,
                 "r_frame_rate": "30/1", "avg_frame_rate": "30/1",
                 "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}]}
            ]
        }"#;
        let probe = parse_probe(json).unwrap();
        assert_eq!((probe.width, probe.height), (1080, 1920));
        assert_eq!(probe.rotation, 90);
    }

    #[test]
    fn test_parse_probe_legacy_rotate_tag() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "width": 1280, "height": 720,
                 "r_frame_rate": "25/1", "tags": {"rotate": "270"}}
            ]
        }"#;
        let probe = parse_probe(json).unwrap();
        assert_eq!((probe.width, probe.height), (720, 1280));
        assert_eq!(probe.rotation, 270);

        let upside_down = br#"{
            "streams": [
                {"codec_type": "video", "width": 1280, "height": 720,
                 "r_frame_rate": "25/1", "tags": {"rotate": "180"}}
            ]
        }"#;
        let probe = parse_probe(upside_down).unwrap();
        assert_eq!((probe.width, probe.height), (1280, 720));
        assert_eq!(probe.rotation, 180);
    }

    #[test]
    fn test_parse_probe_without_video_stream() {
        let json = br#"{"streams": [{"codec_type": "audio"}]}"#;
        assert!(matches!(parse_probe(json), Err(MediaError::InvalidVideo(_))));
    }
}
