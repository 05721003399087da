//! Application state.

use std::sync::Arc;

use fpipe_worker::JobService;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub service: Arc<JobService>,
}

impl AppState {
    pub fn new(config: ApiConfig, service: Arc<JobService>) -> Self {
        Self { config, service }
    }
}
