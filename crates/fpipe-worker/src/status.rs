//! Read-only progress access for polling callers.

use fpipe_models::{ConsumerStatus, Job, ProgressSnapshot};
use tokio::sync::watch;

/// Cloneable view of the job's progress.
///
/// Reads never touch the pipeline's queue or result store and never wait on
/// a controller operation in flight.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    rx: watch::Receiver<Job>,
}

impl StatusReporter {
    pub fn new(rx: watch::Receiver<Job>) -> Self {
        Self { rx }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.rx.borrow().snapshot()
    }

    /// `{frames_processed, total_frames, completed}` poll shape.
    pub fn consumer_status(&self) -> ConsumerStatus {
        ConsumerStatus::from(&self.snapshot())
    }

    /// Wait until a snapshot satisfies `predicate`. Returns `None` if the
    /// controller was dropped first.
    pub async fn wait_until<F>(&self, mut predicate: F) -> Option<ProgressSnapshot>
    where
        F: FnMut(&ProgressSnapshot) -> bool,
    {
        let mut rx = self.rx.clone();
        let job = rx.wait_for(|job| predicate(&job.snapshot())).await.ok()?;
        Some(job.snapshot())
    }
}
