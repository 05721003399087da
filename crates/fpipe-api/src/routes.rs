//! API routes.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{
    cancel_processing, consumer_status, download_video, generate_video, health, purge_queue,
    start_consumer, start_producer, status, upload,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let pipeline_routes = Router::new()
        .route("/upload", post(upload))
        .route("/purge-queue", post(purge_queue))
        .route("/start-producer", post(start_producer))
        .route("/start-consumer", post(start_consumer))
        .route("/consumer-status", get(consumer_status))
        .route("/status", get(status))
        .route("/cancel-processing", post(cancel_processing))
        .route("/generate-video", post(generate_video))
        .route("/download-video", get(download_video));

    let health_routes = Router::new().route("/health", get(health));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .merge(pipeline_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        // Multipart uploads are bounded by the configured limit, not axum's 2MB default
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.config.max_upload_bytes))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
