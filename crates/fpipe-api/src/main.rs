//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use fpipe_media::ffmpeg::{check_ffmpeg, check_ffprobe, FfmpegBackend};
use fpipe_media::PassthroughTransform;
use fpipe_worker::{JobService, PipelineConfig};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fpipe_api::{create_router, metrics, ApiConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = ApiConfig::from_env();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or_else(|_| config.is_production());

    let env_filter = EnvFilter::from_default_env().add_directive("fpipe=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting fpipe-api");

    // Load configuration
    let pipeline = PipelineConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);
    info!(
        "Pipeline config: workers={}, queue_capacity={}, work_dir={}",
        pipeline.workers,
        pipeline.queue_capacity,
        pipeline.work_dir.display()
    );

    if let Err(e) = check_ffmpeg().and(check_ffprobe()) {
        warn!("FFmpeg tooling unavailable, uploads will fail to decode: {}", e);
    }

    let backend = Arc::new(FfmpegBackend::new().with_default_fps(pipeline.default_fps));
    let service = Arc::new(JobService::new(
        pipeline,
        backend,
        Arc::new(PassthroughTransform),
    ));
    let state = AppState::new(config.clone(), Arc::clone(&service));

    // Initialize metrics
    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("Failed to install Prometheus recorder")?)
    } else {
        None
    };

    // Create router
    let app = create_router(state, metrics_handle);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid bind address")?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    service.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
