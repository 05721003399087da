//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of consumer workers
    pub workers: usize,
    /// Frame queue capacity (backpressure bound)
    pub queue_capacity: usize,
    /// Fraction of failed frames above which the job fails
    pub max_frame_error_rate: f64,
    /// Frames that must be attempted before the error rate is enforced
    pub min_frames_for_error_rate: u64,
    /// Time allowed for tasks to stop after cancellation
    pub cancel_grace: Duration,
    /// Output frame rate when the source reports none
    pub default_fps: f64,
    /// Root directory for uploads and assembled videos
    pub work_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_capacity: 64,
            max_frame_error_rate: 0.25,
            min_frames_for_error_rate: 8,
            cancel_grace: Duration::from_secs(5),
            default_fps: 25.0,
            work_dir: PathBuf::from("/tmp/fpipe"),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workers: std::env::var("PIPELINE_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.workers),
            queue_capacity: std::env::var("PIPELINE_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.queue_capacity),
            max_frame_error_rate: std::env::var("PIPELINE_MAX_FRAME_ERROR_RATE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|r: &f64| (0.0..=1.0).contains(r))
                .unwrap_or(defaults.max_frame_error_rate),
            min_frames_for_error_rate: std::env::var("PIPELINE_MIN_FRAMES_FOR_ERROR_RATE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_frames_for_error_rate),
            cancel_grace: Duration::from_millis(
                std::env::var("PIPELINE_CANCEL_GRACE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5000),
            ),
            default_fps: std::env::var("PIPELINE_DEFAULT_FPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|fps: &f64| *fps > 0.0)
                .unwrap_or(defaults.default_fps),
            work_dir: std::env::var("PIPELINE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
        }
    }

    /// Directory holding the current upload.
    pub fn upload_dir(&self) -> PathBuf {
        self.work_dir.join("uploads")
    }

    /// Directory receiving assembled videos.
    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("output")
    }
}
