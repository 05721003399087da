//! Structured job logging utilities.
//!
//! Every pipeline task logs through a `JobLogger` so lines carry the job ID,
//! the pipeline generation and the stage that emitted them.

use tracing::{error, info, warn, Span};
use fpipe_models::JobId;

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    generation: u64,
    stage: String,
}

impl JobLogger {
    /// Create a new job logger for a job generation and pipeline stage.
    ///
    /// # Arguments
    /// * `job_id` - The job being processed
    /// * `generation` - Pipeline generation within the job
    /// * `stage` - Emitting stage (e.g., "producer", "consumer-2", "controller")
    pub fn new(job_id: &JobId, generation: u64, stage: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            generation,
            stage: stage.to_string(),
        }
    }

    /// Same job and generation, different stage.
    pub fn for_stage(&self, stage: &str) -> Self {
        Self {
            job_id: self.job_id.clone(),
            generation: self.generation,
            stage: stage.to_string(),
        }
    }

    /// Log the start of a stage.
    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            generation = self.generation,
            stage = %self.stage,
            "Stage started: {}", message
        );
    }

    /// Log a progress update.
    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            generation = self.generation,
            stage = %self.stage,
            "Stage progress: {}", message
        );
    }

    /// Log a recoverable problem.
    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            generation = self.generation,
            stage = %self.stage,
            "Stage warning: {}", message
        );
    }

    /// Log a job-fatal error.
    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            generation = self.generation,
            stage = %self.stage,
            "Stage error: {}", message
        );
    }

    /// Log the completion of a stage.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            generation = self.generation,
            stage = %self.stage,
            "Stage completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Span attached to the spawned task of this stage.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "pipeline",
            job_id = %self.job_id,
            generation = self.generation,
            stage = %self.stage
        )
    }
}
