//! Axum HTTP API server for the frame pipeline.
//!
//! This crate provides:
//! - One route per job operation (upload, produce, consume, cancel, generate, download)
//! - Status polling for progress bars
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
