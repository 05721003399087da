//! Pipeline metrics.
//!
//! Recorded through the `metrics` facade; the API binary installs the
//! Prometheus recorder. Without a recorder these calls are no-ops.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const FRAMES_DECODED_TOTAL: &str = "fpipe_frames_decoded_total";
    pub const FRAMES_PROCESSED_TOTAL: &str = "fpipe_frames_processed_total";
    pub const FRAMES_FAILED_TOTAL: &str = "fpipe_frames_failed_total";
    pub const QUEUE_DEPTH: &str = "fpipe_queue_depth";

    pub const JOBS_STARTED_TOTAL: &str = "fpipe_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "fpipe_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "fpipe_jobs_failed_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "fpipe_jobs_cancelled_total";
    pub const ASSEMBLY_DURATION_SECONDS: &str = "fpipe_assembly_duration_seconds";
}

pub fn record_frame_decoded() {
    counter!(names::FRAMES_DECODED_TOTAL).increment(1);
}

pub fn record_frame_processed(passed_through: bool) {
    counter!(names::FRAMES_PROCESSED_TOTAL).increment(1);
    if passed_through {
        counter!(names::FRAMES_FAILED_TOTAL).increment(1);
    }
}

pub fn record_queue_depth(depth: usize) {
    gauge!(names::QUEUE_DEPTH).set(depth as f64);
}

pub fn record_job_started() {
    counter!(names::JOBS_STARTED_TOTAL).increment(1);
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::ASSEMBLY_DURATION_SECONDS).record(duration_secs);
}

pub fn record_job_failed(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_job_cancelled() {
    counter!(names::JOBS_CANCELLED_TOTAL).increment(1);
}
