//! Progress snapshots for polling clients.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobState};

/// Immutable, consistent read of the job's progress fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    pub generation: u64,
    pub state: JobState,
    pub frames_processed: u64,
    pub frames_failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_total_frames: Option<u64>,
    /// Every frame of the known total has been processed
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub event_seq: u64,
    pub updated_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Best available frame total: exact when known, else the source estimate.
    pub fn reported_total(&self) -> u64 {
        self.total_frames
            .or(self.estimated_total_frames)
            .unwrap_or(0)
    }

    /// Progress percentage (0-100), based on the reported total.
    pub fn percent(&self) -> u8 {
        let total = self.reported_total();
        if total == 0 {
            return 0;
        }
        ((self.frames_processed.min(total) * 100) / total) as u8
    }
}

/// Wire shape of the consumer status poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConsumerStatus {
    pub frames_processed: u64,
    /// Exact frame count; 0 until the source reaches end-of-stream
    pub total_frames: u64,
    /// Container estimate while the exact count is unknown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_total_frames: Option<u64>,
    pub completed: bool,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ProgressSnapshot> for ConsumerStatus {
    fn from(snapshot: &ProgressSnapshot) -> Self {
        Self {
            frames_processed: snapshot.frames_processed,
            total_frames: snapshot.total_frames.unwrap_or(0),
            estimated_total_frames: snapshot
                .total_frames
                .is_none()
                .then_some(snapshot.estimated_total_frames)
                .flatten(),
            completed: snapshot.completed,
            state: snapshot.state,
            error: snapshot.error.clone(),
        }
    }
}
