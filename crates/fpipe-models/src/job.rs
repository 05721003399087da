//! Job definitions and the pipeline state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::frame::SourceInfo;
use crate::status::ProgressSnapshot;

/// Unique identifier for a job, regenerated on every upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline state of the single active job.
///
/// `Idle -> Producing -> Consuming -> Completed`, with `Cancelled` and `Failed`
/// reachable from `Producing` or `Consuming`. A purge returns any state to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// No pipeline running; waiting for `start_production`
    #[default]
    Idle,
    /// Producer is decoding frames into the queue
    Producing,
    /// Consumer pool is draining the queue (producer may still be running)
    Consuming,
    /// Output video assembled
    Completed,
    /// Stopped on request; buffers purged
    Cancelled,
    /// Stopped by a job-fatal error
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Producing => "producing",
            JobState::Consuming => "consuming",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        }
    }

    /// Whether producer or consumer tasks may be running in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Producing | JobState::Consuming)
    }

    /// Terminal until the next purge/upload resets the job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }

    /// Forward edges of the state machine. Resets to `Idle` are not transitions.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Idle, Producing)
                | (Producing, Consuming)
                | (Producing, Cancelled)
                | (Producing, Failed)
                | (Consuming, Completed)
                | (Consuming, Cancelled)
                | (Consuming, Failed)
                // assembly retry after an encoder failure
                | (Failed, Completed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejected state machine edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// Category of a job-fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The frame source could not continue
    Decode,
    /// Too many per-frame transform failures
    FrameProcessing,
    /// The encoder could not produce an output video
    Assembly,
    /// A task did not stop within the cancellation grace period
    CancellationTimeout,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Decode => "decode_error",
            FailureKind::FrameProcessing => "frame_processing_error",
            FailureKind::Assembly => "assembly_error",
            FailureKind::CancellationTimeout => "cancellation_timeout",
        }
    }
}

/// Recorded cause of a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// The single job owned by the controller.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Job ID (regenerated per upload)
    pub id: JobId,

    /// Pipeline generation, bumped by every `start_production`
    pub generation: u64,

    /// Current state
    pub state: JobState,

    /// Exact frame count, known once the producer reached end-of-stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<u64>,

    /// Container frame count reported by the source before decoding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_total_frames: Option<u64>,

    /// Frames written to the result store (including pass-through frames)
    pub frames_processed: u64,

    /// Frames whose transform failed and were passed through unmodified
    pub frames_failed: u64,

    /// Properties of the current source video
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInfo>,

    /// Failure cause (only set in `Failed`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Sequence number for change ordering (monotonically increasing)
    pub event_seq: u64,
}

impl Default for Job {
    fn default() -> Self {
        Self::new(JobId::new())
    }
}

impl Job {
    /// Create an idle job.
    pub fn new(id: JobId) -> Self {
        let now = Utc::now();
        Self {
            id,
            generation: 0,
            state: JobState::Idle,
            total_frames: None,
            estimated_total_frames: None,
            frames_processed: 0,
            frames_failed: 0,
            source: None,
            error: None,
            created_at: now,
            updated_at: now,
            event_seq: 0,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.event_seq += 1;
    }

    /// Move along a state machine edge.
    pub fn transition(&mut self, to: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        if self.state == JobState::Failed
            && to == JobState::Completed
            && !self.failed_with(FailureKind::Assembly)
        {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        if to != JobState::Failed {
            self.error = None;
        }
        self.state = to;
        self.touch();
        Ok(())
    }

    /// Start a fresh generation: `Idle -> Producing` with zeroed counters.
    pub fn begin_generation(&mut self, source: SourceInfo) -> Result<u64, InvalidTransition> {
        self.transition(JobState::Producing)?;
        self.generation += 1;
        self.total_frames = None;
        self.estimated_total_frames = source.frame_count_hint;
        self.frames_processed = 0;
        self.frames_failed = 0;
        self.source = Some(source);
        Ok(self.generation)
    }

    /// Purge: back to `Idle` from any state, counters reset.
    pub fn reset(&mut self) {
        self.state = JobState::Idle;
        self.total_frames = None;
        self.estimated_total_frames = None;
        self.frames_processed = 0;
        self.frames_failed = 0;
        self.source = None;
        self.error = None;
        self.touch();
    }

    /// Replace the job identity (new upload) and reset.
    pub fn renew(&mut self, id: JobId) {
        self.id = id;
        self.created_at = Utc::now();
        self.reset();
    }

    /// Record the exact frame count at end-of-stream.
    pub fn record_total_frames(&mut self, total: u64) {
        self.total_frames = Some(total);
        self.touch();
    }

    /// Count one frame written to the result store.
    pub fn record_frame(&mut self, passed_through: bool) {
        self.frames_processed += 1;
        if passed_through {
            self.frames_failed += 1;
        }
        self.touch();
    }

    /// Move to `Failed` with a cause.
    pub fn fail(&mut self, failure: JobFailure) -> Result<(), InvalidTransition> {
        self.transition(JobState::Failed)?;
        self.error = Some(failure);
        Ok(())
    }

    /// Whether the recorded failure is of the given kind.
    pub fn failed_with(&self, kind: FailureKind) -> bool {
        self.state == JobState::Failed && self.error.as_ref().map(|e| e.kind) == Some(kind)
    }

    /// Every frame of a known, non-empty total has been written.
    pub fn is_complete(&self) -> bool {
        matches!(self.total_frames, Some(total) if total > 0 && self.frames_processed == total)
    }

    /// Consistent read of the progress fields.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            job_id: self.id.clone(),
            generation: self.generation,
            state: self.state,
            frames_processed: self.frames_processed,
            frames_failed: self.frames_failed,
            total_frames: self.total_frames,
            estimated_total_frames: self.estimated_total_frames,
            completed: self.is_complete(),
            error: self.error.as_ref().map(|e| e.to_string()),
            event_seq: self.event_seq,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(hint: Option<u64>) -> SourceInfo {
        SourceInfo {
            width: 4,
            height: 4,
            fps: Some(30.0),
            frame_count_hint: hint,
        }
    }

    #[test]
    fn test_state_machine_edges() {
        assert!(JobState::Idle.can_transition_to(JobState::Producing));
        assert!(JobState::Producing.can_transition_to(JobState::Consuming));
        assert!(JobState::Consuming.can_transition_to(JobState::Completed));
        assert!(JobState::Producing.can_transition_to(JobState::Cancelled));
        assert!(JobState::Consuming.can_transition_to(JobState::Failed));

        assert!(!JobState::Idle.can_transition_to(JobState::Consuming));
        assert!(!JobState::Producing.can_transition_to(JobState::Completed));
        assert!(!JobState::Completed.can_transition_to(JobState::Producing));
        assert!(!JobState::Cancelled.can_transition_to(JobState::Consuming));
        assert!(!JobState::Idle.can_transition_to(JobState::Cancelled));
    }

    #[test]
    fn test_begin_generation_resets_counters() {
        let mut job = Job::new(JobId::from_string("job-1"));
        let gen = job.begin_generation(source(Some(10))).unwrap();
        assert_eq!(gen, 1);
        assert_eq!(job.state, JobState::Producing);
        assert_eq!(job.estimated_total_frames, Some(10));

        job.record_frame(false);
        job.record_frame(true);
        assert_eq!(job.frames_processed, 2);
        assert_eq!(job.frames_failed, 1);

        job.transition(JobState::Consuming).unwrap();
        job.transition(JobState::Cancelled).unwrap();
        job.reset();
        assert_eq!(job.state, JobState::Idle);
        assert_eq!(job.frames_processed, 0);

        let gen = job.begin_generation(source(None)).unwrap();
        assert_eq!(gen, 2);
        assert_eq!(job.frames_failed, 0);
    }

    #[test]
    fn test_begin_generation_requires_idle() {
        let mut job = Job::default();
        job.begin_generation(source(None)).unwrap();
        let err = job.begin_generation(source(None)).unwrap_err();
        assert_eq!(err.from, JobState::Producing);
        assert_eq!(job.generation, 1);
    }

    #[test]
    fn test_completion_requires_known_total() {
        let mut job = Job::default();
        job.begin_generation(source(Some(2))).unwrap();
        job.record_frame(false);
        job.record_frame(false);
        // hint alone is not authoritative
        assert!(!job.is_complete());

        job.record_total_frames(2);
        assert!(job.is_complete());
    }

    #[test]
    fn test_failed_to_completed_only_after_assembly_failure() {
        let mut job = Job::default();
        job.begin_generation(source(None)).unwrap();
        job.fail(JobFailure::new(FailureKind::Decode, "bad packet")).unwrap();
        assert!(job.transition(JobState::Completed).is_err());

        let mut job = Job::default();
        job.begin_generation(source(None)).unwrap();
        job.transition(JobState::Consuming).unwrap();
        job.fail(JobFailure::new(FailureKind::Assembly, "encoder died")).unwrap();
        assert!(job.failed_with(FailureKind::Assembly));
        job.transition(JobState::Completed).unwrap();
        assert!(job.error.is_none());
    }

    #[test]
    fn test_snapshot_reports_error_string() {
        let mut job = Job::default();
        job.begin_generation(source(None)).unwrap();
        job.fail(JobFailure::new(FailureKind::Decode, "truncated stream")).unwrap();

        let snapshot = job.snapshot();
        assert_eq!(snapshot.state, JobState::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("decode_error: truncated stream"));
    }
}
