//! Pipeline request handlers.
//!
//! One handler per job operation; each forwards to the `JobService` and
//! shapes the result for polling clients.

use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use fpipe_models::{ConsumerStatus, JobId, JobState, ProgressSnapshot};
use serde::Serialize;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Multipart field carrying the source video.
pub const UPLOAD_FIELD: &str = "video";

/// Acknowledgement of a job operation.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    pub job_id: JobId,
    pub state: JobState,
}

impl MessageResponse {
    fn new(message: &str, snapshot: &ProgressSnapshot) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
            job_id: snapshot.job_id.clone(),
            state: snapshot.state,
        })
    }
}

/// Upload response.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub job_id: JobId,
    pub filename: String,
    pub bytes: u64,
}

/// Full progress view, including buffer occupancy.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub snapshot: ProgressSnapshot,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Frames waiting in the queue
    pub queue_status: usize,
    /// Frames held in the result store
    pub stored_frames: usize,
}

/// Store the uploaded video and reset the job.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(ApiError::bad_request("No selected file"));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;

        let receipt = state.service.upload(&filename, &bytes).await?;
        metrics::record_upload(receipt.bytes);
        info!(job_id = %receipt.job_id, "Accepted upload '{}'", filename);

        return Ok(Json(UploadResponse {
            message: "File uploaded successfully".to_string(),
            job_id: receipt.job_id,
            filename: receipt.file_name,
            bytes: receipt.bytes,
        }));
    }

    Err(ApiError::bad_request("No video file provided"))
}

pub async fn purge_queue(State(state): State<AppState>) -> ApiResult<Json<MessageResponse>> {
    let snapshot = state.service.purge_queue().await?;
    Ok(MessageResponse::new("Queue purged successfully", &snapshot))
}

pub async fn start_producer(State(state): State<AppState>) -> ApiResult<Json<MessageResponse>> {
    let snapshot = state.service.start_producer().await?;
    Ok(MessageResponse::new("Producer started successfully", &snapshot))
}

pub async fn start_consumer(State(state): State<AppState>) -> ApiResult<Json<MessageResponse>> {
    let snapshot = state.service.start_consumer().await?;
    Ok(MessageResponse::new("Consumers started successfully", &snapshot))
}

/// `{frames_processed, total_frames, completed}` poll.
pub async fn consumer_status(State(state): State<AppState>) -> Json<ConsumerStatus> {
    Json(state.service.consumer_status())
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.service.status();
    let buffers = state.service.controller().buffer_stats().await;
    Json(StatusResponse {
        progress: snapshot.percent(),
        snapshot,
        queue_status: buffers.queued,
        stored_frames: buffers.stored,
    })
}

pub async fn cancel_processing(
    State(state): State<AppState>,
) -> ApiResult<Json<MessageResponse>> {
    let snapshot = state.service.cancel_processing().await?;
    Ok(MessageResponse::new("Processing cancelled successfully", &snapshot))
}

pub async fn generate_video(State(state): State<AppState>) -> ApiResult<Json<MessageResponse>> {
    let snapshot = state.service.generate_video().await?;
    Ok(MessageResponse::new("Video generated successfully", &snapshot))
}

/// Send the assembled video as an attachment.
pub async fn download_video(State(state): State<AppState>) -> ApiResult<Response> {
    let video = state.service.download_video().await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, video.content_type)
        .header(header::CONTENT_LENGTH, video.bytes.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", video.file_name),
        )
        .body(Body::from(video.bytes))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}
