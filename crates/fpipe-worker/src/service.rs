//! Transport-agnostic request surface.
//!
//! `JobService` binds the controller to an uploaded source file and a media
//! backend. The HTTP layer maps its operations one-to-one onto routes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fpipe_media::{FrameTransform, MediaBackend};
use fpipe_models::{ConsumerStatus, JobId, JobState, ProgressSnapshot};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::controller::JobController;
use crate::error::{PipelineError, PipelineResult};

/// File name offered for the assembled video.
pub const DOWNLOAD_FILE_NAME: &str = "processed_video.mp4";

#[derive(Debug, Clone)]
struct StoredUpload {
    path: PathBuf,
    file_name: String,
    bytes: u64,
}

/// Accepted upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    pub job_id: JobId,
    pub file_name: String,
    pub bytes: u64,
}

/// Assembled video ready to send.
#[derive(Debug, Clone)]
pub struct DownloadedVideo {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_name: String,
}

/// The single-job pipeline service.
pub struct JobService {
    config: PipelineConfig,
    backend: Arc<dyn MediaBackend>,
    controller: JobController,
    upload: Mutex<Option<StoredUpload>>,
}

impl JobService {
    pub fn new(
        config: PipelineConfig,
        backend: Arc<dyn MediaBackend>,
        transform: Arc<dyn FrameTransform>,
    ) -> Self {
        let encoder = backend.encoder(&config.output_dir());
        let controller = JobController::new(config.clone(), transform, encoder);
        Self {
            config,
            backend,
            controller,
            upload: Mutex::new(None),
        }
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    /// Store a new source video and reset the job to `Idle` under a new ID.
    pub async fn upload(&self, file_name: &str, bytes: &[u8]) -> PipelineResult<UploadReceipt> {
        if bytes.is_empty() {
            return Err(PipelineError::invalid_upload("empty video file"));
        }
        let mut upload = self.upload.lock().await;

        let job_id = JobId::new();
        if let Err(e) = self.controller.renew(job_id.clone()).await {
            warn!("Previous pipeline did not stop cleanly: {}", e);
        }

        let dir = self.config.upload_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.{}", job_id, upload_extension(file_name)));
        tokio::fs::write(&path, bytes).await?;

        let stored = StoredUpload {
            path: path.clone(),
            file_name: file_name.to_string(),
            bytes: bytes.len() as u64,
        };
        if let Some(previous) = upload.replace(stored) {
            if previous.path != path {
                if let Err(e) = tokio::fs::remove_file(&previous.path).await {
                    warn!("Failed to remove previous upload {:?}: {}", previous.path, e);
                }
            }
        }

        info!(
            "Stored upload '{}' ({} bytes) as job {}",
            file_name,
            bytes.len(),
            job_id
        );
        Ok(UploadReceipt {
            job_id,
            file_name: file_name.to_string(),
            bytes: bytes.len() as u64,
        })
    }

    /// Clear buffers and counters; the upload is kept.
    pub async fn purge_queue(&self) -> PipelineResult<ProgressSnapshot> {
        self.controller.purge().await?;
        Ok(self.controller.snapshot())
    }

    /// Open the uploaded video and start decoding it.
    pub async fn start_producer(&self) -> PipelineResult<ProgressSnapshot> {
        let upload = self.upload.lock().await;
        let state = self.controller.state();
        if state != JobState::Idle {
            return Err(PipelineError::invalid_state("start production", state));
        }
        let stored = upload
            .as_ref()
            .ok_or_else(|| PipelineError::not_found("no video uploaded"))?;

        let source = self
            .backend
            .open_source(&stored.path)
            .await
            .map_err(|e| PipelineError::decode(e.to_string()))?;
        self.controller.start_production(source).await?;
        info!(
            "Producer started for '{}' ({} bytes)",
            stored.file_name, stored.bytes
        );
        Ok(self.controller.snapshot())
    }

    pub async fn start_consumer(&self) -> PipelineResult<ProgressSnapshot> {
        self.controller.start_consumption().await?;
        Ok(self.controller.snapshot())
    }

    pub fn consumer_status(&self) -> ConsumerStatus {
        ConsumerStatus::from(&self.controller.snapshot())
    }

    pub fn status(&self) -> ProgressSnapshot {
        self.controller.snapshot()
    }

    pub async fn cancel_processing(&self) -> PipelineResult<ProgressSnapshot> {
        self.controller.cancel().await
    }

    pub async fn generate_video(&self) -> PipelineResult<ProgressSnapshot> {
        let artifact = self.controller.assemble().await?;
        info!("Video ready ({} frames)", artifact.frame_count);
        Ok(self.controller.snapshot())
    }

    pub async fn download_video(&self) -> PipelineResult<DownloadedVideo> {
        let artifact = self
            .controller
            .artifact()
            .await
            .ok_or_else(|| PipelineError::not_found("no generated video"))?;
        let bytes = artifact.read_bytes().await?;
        Ok(DownloadedVideo {
            bytes,
            content_type: artifact.content_type.clone(),
            file_name: DOWNLOAD_FILE_NAME.to_string(),
        })
    }

    /// Stop the pipeline and remove the stored upload.
    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
        if let Some(stored) = self.upload.lock().await.take() {
            if let Err(e) = tokio::fs::remove_file(&stored.path).await {
                warn!("Failed to remove upload {:?}: {}", stored.path, e);
            }
        }
    }
}

/// Lowercase extension of an uploaded file name, `bin` when unusable.
fn upload_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}
