//! Consumer pool: apply the per-frame transform and store results.

use std::sync::Arc;

use fpipe_media::FrameTransform;
use fpipe_queue::{FrameQueue, QueueError, ResultStore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

use crate::error::PipelineError;
use crate::logging::JobLogger;
use crate::metrics;
use crate::tracker::{FrameOutcome, JobTracker};

/// Everything a consumer worker shares with its siblings.
#[derive(Clone)]
pub struct ConsumerContext {
    pub generation: u64,
    pub queue: Arc<FrameQueue>,
    pub store: Arc<ResultStore>,
    pub tracker: Arc<JobTracker>,
    pub transform: Arc<dyn FrameTransform>,
    pub cancel: CancellationToken,
    pub logger: JobLogger,
}

/// Fixed-size pool of consumer workers.
pub struct ConsumerPool;

impl ConsumerPool {
    /// Spawn `workers` consumers. Each handle resolves to the number of
    /// frames that worker wrote.
    pub fn spawn(workers: usize, ctx: ConsumerContext) -> Vec<JoinHandle<u64>> {
        ctx.logger.log_start(&format!(
            "spawning {} consumers with transform '{}'",
            workers.max(1),
            ctx.transform.name()
        ));
        (0..workers.max(1))
            .map(|worker| {
                let logger = ctx.logger.for_stage(&format!("consumer-{}", worker));
                let span = logger.create_span();
                let consumer = Consumer {
                    ctx: ctx.clone(),
                    logger,
                };
                tokio::spawn(consumer.run().instrument(span))
            })
            .collect()
    }
}

struct Consumer {
    ctx: ConsumerContext,
    logger: JobLogger,
}

impl Consumer {
    async fn run(self) -> u64 {
        let ctx = &self.ctx;
        let mut written = 0u64;

        loop {
            let frame = match ctx.queue.pop(&ctx.cancel).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("Queue drained, consumer exiting");
                    break;
                }
                Err(_) => break,
            };
            metrics::record_queue_depth(ctx.queue.len());

            let index = frame.index;
            let applied = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                applied = ctx.transform.apply(&frame) => applied,
            };

            let (output, passed_through) = match applied {
                Ok(out) if out.index == index => (out, false),
                Ok(out) => {
                    self.warn_pass_through(PipelineError::frame_processing(
                        index,
                        format!("transform returned frame {}", out.index),
                    ));
                    (frame, true)
                }
                Err(e) => {
                    self.warn_pass_through(PipelineError::frame_processing(index, e.to_string()));
                    (frame, true)
                }
            };

            // No writes once cancelled
            if ctx.cancel.is_cancelled() {
                break;
            }

            match ctx.store.insert(ctx.generation, output) {
                Ok(()) => {}
                Err(QueueError::DuplicateIndex(index)) => {
                    self.logger
                        .log_warning(&format!("frame {} already stored, skipping", index));
                    continue;
                }
                Err(e) => {
                    debug!("Result store rejected write: {}", e);
                    break;
                }
            }
            written += 1;
            metrics::record_frame_processed(passed_through);

            match ctx.tracker.record_frame(ctx.generation, passed_through) {
                FrameOutcome::Recorded => {}
                FrameOutcome::Ignored => break,
                FrameOutcome::BudgetExceeded => {
                    self.logger
                        .log_error("frame failure rate over limit, stopping pipeline");
                    ctx.cancel.cancel();
                    ctx.queue.purge();
                    break;
                }
            }
        }

        self.logger
            .log_completion(&format!("{} frames written", written));
        written
    }

    fn warn_pass_through(&self, err: PipelineError) {
        self.logger
            .log_warning(&format!("{}; passing original frame through", err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fpipe_media::{MediaError, MediaResult, PassthroughTransform};
    use fpipe_models::{FailureKind, Frame, Job, JobId, JobState, RawFrame, SourceInfo};

    use crate::tracker::ErrorPolicy;

    /// Inverts pixels; fails on indices divisible by `fail_every`.
    struct InvertTransform {
        fail_every: Option<u64>,
    }

    #[async_trait]
    impl FrameTransform for InvertTransform {
        fn name(&self) -> &str {
            "invert"
        }

        async fn apply(&self, frame: &Frame) -> MediaResult<Frame> {
            if let Some(n) = self.fail_every {
                if frame.index % n == 0 {
                    return Err(MediaError::transform("model rejected frame"));
                }
            }
            let data = frame.data.iter().map(|b| 255 - b).collect();
            Ok(frame.with_data(frame.width, frame.height, data))
        }
    }

    fn context(
        transform: Arc<dyn FrameTransform>,
        policy: ErrorPolicy,
    ) -> ConsumerContext {
        let tracker = Arc::new(JobTracker::new(
            Job::new(JobId::from_string("job-c")),
            policy,
        ));
        let generation = tracker
            .begin_generation(SourceInfo {
                width: 1,
                height: 1,
                fps: None,
                frame_count_hint: None,
            })
            .unwrap();
        tracker.transition(generation, JobState::Consuming).unwrap();
        ConsumerContext {
            generation,
            queue: Arc::new(FrameQueue::new(8)),
            store: Arc::new(ResultStore::new(generation)),
            tracker,
            transform,
            cancel: CancellationToken::new(),
            logger: JobLogger::new(&JobId::from_string("job-c"), generation, "controller"),
        }
    }

    fn lenient() -> ErrorPolicy {
        ErrorPolicy {
            max_frame_error_rate: 1.0,
            min_frames_for_error_rate: 1,
        }
    }

    async fn feed(ctx: &ConsumerContext, count: u64) {
        for i in 0..count {
            let frame = Frame::from_raw(i, RawFrame::new(1, 1, vec![i as u8; 3]));
            if ctx.queue.push(frame, &ctx.cancel).await.is_err() {
                break;
            }
        }
        ctx.queue.close();
    }

    #[tokio::test]
    async fn test_pool_writes_every_index_once() {
        let ctx = context(Arc::new(PassthroughTransform), lenient());
        let handles = ConsumerPool::spawn(3, ctx.clone());
        feed(&ctx, 40).await;

        let mut written = 0;
        for handle in handles {
            written += handle.await.unwrap();
        }
        assert_eq!(written, 40);
        assert_eq!(ctx.store.indices(), (0..40).collect::<Vec<_>>());
        assert_eq!(ctx.tracker.snapshot().frames_processed, 40);
    }

    #[tokio::test]
    async fn test_failed_transform_passes_original_through() {
        let ctx = context(
            Arc::new(InvertTransform {
                fail_every: Some(3),
            }),
            lenient(),
        );
        let handles = ConsumerPool::spawn(2, ctx.clone());
        feed(&ctx, 6).await;
        for handle in handles {
            handle.await.unwrap();
        }

        // 0 and 3 failed and keep their pixels
        assert_eq!(ctx.store.get(0).unwrap().data, vec![0; 3]);
        assert_eq!(ctx.store.get(3).unwrap().data, vec![3; 3]);
        assert_eq!(ctx.store.get(1).unwrap().data, vec![254; 3]);

        let snapshot = ctx.tracker.snapshot();
        assert_eq!(snapshot.frames_processed, 6);
        assert_eq!(snapshot.frames_failed, 2);
    }

    #[tokio::test]
    async fn test_error_budget_stops_pool() {
        let ctx = context(
            Arc::new(InvertTransform {
                fail_every: Some(1),
            }),
            ErrorPolicy {
                max_frame_error_rate: 0.25,
                min_frames_for_error_rate: 4,
            },
        );
        let handles = ConsumerPool::spawn(1, ctx.clone());
        feed(&ctx, 8).await;
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(ctx.cancel.is_cancelled());
        assert!(ctx.queue.is_empty());
        let job = ctx.tracker.job();
        assert!(job.failed_with(FailureKind::FrameProcessing));
        assert_eq!(job.frames_processed, 4);
        // results kept for diagnostics
        assert_eq!(ctx.store.len(), 4);
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_workers() {
        let ctx = context(Arc::new(PassthroughTransform), lenient());
        let handles = ConsumerPool::spawn(3, ctx.clone());
        ctx.cancel.cancel();
        for handle in handles {
            let written = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(written, 0);
        }
        assert!(ctx.store.is_empty());
    }
}
