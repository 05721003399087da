//! Job state published to pollers.
//!
//! The tracker is the controller's record of the single job. Pipeline tasks
//! report into it with their generation number; reports from a generation
//! that is no longer active are ignored, so a slow task can never move the
//! counters of a purged or cancelled run. Whether a reported error is
//! job-fatal is decided here, atomically with the counter update.

use fpipe_models::{
    FailureKind, InvalidTransition, Job, JobFailure, JobId, JobState, ProgressSnapshot, SourceInfo,
};
use tokio::sync::watch;

use crate::metrics;

/// Per-frame failure budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorPolicy {
    pub max_frame_error_rate: f64,
    pub min_frames_for_error_rate: u64,
}

impl ErrorPolicy {
    /// `failed / attempted` is over budget once enough frames were attempted.
    pub fn exceeded(&self, failed: u64, attempted: u64) -> bool {
        attempted > 0
            && attempted >= self.min_frames_for_error_rate
            && (failed as f64 / attempted as f64) > self.max_frame_error_rate
    }
}

/// Result of reporting one processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Counted
    Recorded,
    /// Generation no longer active; the caller should stop
    Ignored,
    /// Counted, and the failure budget is spent: the job is now `Failed`
    BudgetExceeded,
}

/// Watch-backed holder of the job record.
#[derive(Debug)]
pub struct JobTracker {
    job: watch::Sender<Job>,
    policy: ErrorPolicy,
}

impl JobTracker {
    pub fn new(job: Job, policy: ErrorPolicy) -> Self {
        let (job, _) = watch::channel(job);
        Self { job, policy }
    }

    /// Receiver observing every change.
    pub fn subscribe(&self) -> watch::Receiver<Job> {
        self.job.subscribe()
    }

    /// Consistent read of the progress fields.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.job.borrow().snapshot()
    }

    /// Copy of the full job record.
    pub fn job(&self) -> Job {
        self.job.borrow().clone()
    }

    pub fn state(&self) -> JobState {
        self.job.borrow().state
    }

    pub fn job_id(&self) -> JobId {
        self.job.borrow().id.clone()
    }

    /// `Idle -> Producing`; returns the new generation.
    pub fn begin_generation(&self, source: SourceInfo) -> Result<u64, InvalidTransition> {
        let mut result = Err(InvalidTransition {
            from: JobState::Idle,
            to: JobState::Producing,
        });
        self.job.send_if_modified(|job| {
            result = job.begin_generation(source);
            result.is_ok()
        });
        result
    }

    /// Move the given generation along a state machine edge.
    pub fn transition(&self, generation: u64, to: JobState) -> Result<(), InvalidTransition> {
        let mut result = Ok(());
        self.job.send_if_modified(|job| {
            if job.generation != generation {
                result = Err(InvalidTransition {
                    from: job.state,
                    to,
                });
                return false;
            }
            result = job.transition(to);
            result.is_ok()
        });
        result
    }

    /// Exact frame count at end-of-stream. Ignored for inactive generations.
    pub fn record_total_frames(&self, generation: u64, total: u64) -> bool {
        self.job.send_if_modified(|job| {
            if job.generation != generation || !job.state.is_active() {
                return false;
            }
            job.record_total_frames(total);
            true
        })
    }

    /// Count a frame written to the result store and apply the failure budget.
    pub fn record_frame(&self, generation: u64, passed_through: bool) -> FrameOutcome {
        let policy = self.policy;
        let mut outcome = FrameOutcome::Ignored;
        self.job.send_if_modified(|job| {
            if job.generation != generation || !job.state.is_active() {
                return false;
            }
            job.record_frame(passed_through);
            outcome = FrameOutcome::Recorded;

            if passed_through && policy.exceeded(job.frames_failed, job.frames_processed) {
                let message = format!(
                    "{} of {} frames failed processing (limit {:.0}%)",
                    job.frames_failed,
                    job.frames_processed,
                    policy.max_frame_error_rate * 100.0
                );
                if job
                    .fail(JobFailure::new(FailureKind::FrameProcessing, message))
                    .is_ok()
                {
                    outcome = FrameOutcome::BudgetExceeded;
                }
            }
            true
        });
        if outcome == FrameOutcome::BudgetExceeded {
            metrics::record_job_failed(FailureKind::FrameProcessing.as_str());
        }
        outcome
    }

    /// Fail an active generation. Returns false if the job already stopped.
    pub fn fail(&self, generation: u64, failure: JobFailure) -> bool {
        let kind = failure.kind;
        let failed = self.job.send_if_modified(|job| {
            if job.generation != generation || !job.state.is_active() {
                return false;
            }
            job.fail(failure).is_ok()
        });
        if failed {
            metrics::record_job_failed(kind.as_str());
        }
        failed
    }

    /// Record an encoder failure: fails a `Consuming` job, or refreshes the
    /// cause of a job already failed by a previous assembly attempt.
    pub fn record_assembly_failure(&self, generation: u64, message: impl Into<String>) -> bool {
        let failure = JobFailure::new(FailureKind::Assembly, message);
        let recorded = self.job.send_if_modified(|job| {
            if job.generation != generation {
                return false;
            }
            if job.failed_with(FailureKind::Assembly) {
                job.error = Some(failure);
                return true;
            }
            job.fail(failure).is_ok()
        });
        if recorded {
            metrics::record_job_failed(FailureKind::Assembly.as_str());
        }
        recorded
    }

    /// Purge: back to `Idle`, counters zeroed, same job ID.
    pub fn reset(&self) {
        self.job.send_modify(|job| job.reset());
    }

    /// New upload: fresh job ID, `Idle`.
    pub fn renew(&self, id: JobId) {
        self.job.send_modify(|job| job.renew(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(rate: f64, min: u64) -> JobTracker {
        JobTracker::new(
            Job::new(JobId::from_string("job-t")),
            ErrorPolicy {
                max_frame_error_rate: rate,
                min_frames_for_error_rate: min,
            },
        )
    }

    fn info() -> SourceInfo {
        SourceInfo {
            width: 2,
            height: 2,
            fps: None,
            frame_count_hint: None,
        }
    }

    #[test]
    fn test_error_policy_threshold() {
        let policy = ErrorPolicy {
            max_frame_error_rate: 0.5,
            min_frames_for_error_rate: 4,
        };
        assert!(!policy.exceeded(3, 3)); // not enough samples
        assert!(!policy.exceeded(2, 4)); // exactly at the limit
        assert!(policy.exceeded(3, 4));
    }

    #[test]
    fn test_stale_generation_reports_ignored() {
        let tracker = tracker(1.0, 1);
        let gen = tracker.begin_generation(info()).unwrap();
        assert_eq!(tracker.record_frame(gen, false), FrameOutcome::Recorded);
        assert_eq!(tracker.record_frame(gen + 1, false), FrameOutcome::Ignored);

        tracker.transition(gen, JobState::Cancelled).unwrap();
        assert_eq!(tracker.record_frame(gen, false), FrameOutcome::Ignored);
        assert!(!tracker.record_total_frames(gen, 10));
        assert_eq!(tracker.snapshot().frames_processed, 1);
    }

    #[test]
    fn test_budget_exceeded_fails_job_once() {
        let tracker = tracker(0.25, 4);
        let gen = tracker.begin_generation(info()).unwrap();
        tracker.transition(gen, JobState::Consuming).unwrap();

        assert_eq!(tracker.record_frame(gen, false), FrameOutcome::Recorded);
        assert_eq!(tracker.record_frame(gen, true), FrameOutcome::Recorded);
        assert_eq!(tracker.record_frame(gen, false), FrameOutcome::Recorded);
        // 2 of 4 failed: over 25%
        assert_eq!(tracker.record_frame(gen, true), FrameOutcome::BudgetExceeded);

        let job = tracker.job();
        assert!(job.failed_with(FailureKind::FrameProcessing));
        assert_eq!(tracker.record_frame(gen, true), FrameOutcome::Ignored);
    }

    #[test]
    fn test_first_failure_wins() {
        let tracker = tracker(1.0, 1);
        let gen = tracker.begin_generation(info()).unwrap();
        assert!(tracker.fail(gen, JobFailure::new(FailureKind::Decode, "first")));
        assert!(!tracker.fail(gen, JobFailure::new(FailureKind::Decode, "second")));
        assert_eq!(
            tracker.snapshot().error.as_deref(),
            Some("decode_error: first")
        );
    }

    #[test]
    fn test_assembly_failure_can_be_refreshed() {
        let tracker = tracker(1.0, 1);
        let gen = tracker.begin_generation(info()).unwrap();
        tracker.transition(gen, JobState::Consuming).unwrap();

        assert!(tracker.record_assembly_failure(gen, "encoder crashed"));
        assert!(tracker.record_assembly_failure(gen, "encoder crashed again"));
        assert_eq!(
            tracker.snapshot().error.as_deref(),
            Some("assembly_error: encoder crashed again")
        );
        tracker.transition(gen, JobState::Completed).unwrap();
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let tracker = tracker(1.0, 1);
        let mut rx = tracker.subscribe();
        let gen = tracker.begin_generation(info()).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().state, JobState::Producing);

        tracker.record_frame(gen, false);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().frames_processed, 1);
    }
}
