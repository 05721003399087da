//! Job controller.
//!
//! Owns the single job, its state machine and the running pipeline. Every
//! mutating operation serializes through one async mutex, so concurrent
//! callers observe operations one at a time. Progress reads go through the
//! tracker and never take that lock.

use std::sync::Arc;
use std::time::Instant;

use fpipe_media::{FrameSource, FrameTransform, VideoArtifact, VideoEncoder};
use fpipe_models::{
    FailureKind, FrameIndex, Job, JobFailure, JobId, JobState, ProgressSnapshot,
};
use fpipe_queue::{FrameQueue, ResultStore};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use crate::assembler::VideoAssembler;
use crate::config::PipelineConfig;
use crate::consumer::{ConsumerContext, ConsumerPool};
use crate::error::{PipelineError, PipelineResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::producer::{Producer, ProducerOutcome};
use crate::status::StatusReporter;
use crate::tracker::{ErrorPolicy, JobTracker};

/// Occupancy of the current generation's buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub queued: usize,
    pub stored: usize,
}

/// One generation's tasks and buffers.
struct PipelineRun {
    generation: u64,
    cancel: CancellationToken,
    queue: Arc<FrameQueue>,
    store: Arc<ResultStore>,
    producer: Option<JoinHandle<ProducerOutcome>>,
    consumers: Vec<JoinHandle<u64>>,
    logger: JobLogger,
    fps: f64,
    started_at: Instant,
}

impl PipelineRun {
    fn purge_buffers(&self) -> BufferStats {
        BufferStats {
            queued: self.queue.purge(),
            stored: self.store.purge(),
        }
    }
}

#[derive(Default)]
struct ControllerInner {
    run: Option<PipelineRun>,
    artifact: Option<VideoArtifact>,
}

/// Orchestrates producer, consumer pool and assembly for the single job.
pub struct JobController {
    config: PipelineConfig,
    tracker: Arc<JobTracker>,
    transform: Arc<dyn FrameTransform>,
    assembler: VideoAssembler,
    inner: Mutex<ControllerInner>,
}

impl JobController {
    pub fn new(
        config: PipelineConfig,
        transform: Arc<dyn FrameTransform>,
        encoder: Arc<dyn VideoEncoder>,
    ) -> Self {
        let tracker = Arc::new(JobTracker::new(
            Job::new(JobId::new()),
            ErrorPolicy {
                max_frame_error_rate: config.max_frame_error_rate,
                min_frames_for_error_rate: config.min_frames_for_error_rate,
            },
        ));
        Self {
            config,
            tracker,
            transform,
            assembler: VideoAssembler::new(encoder),
            inner: Mutex::new(ControllerInner::default()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Lock-free progress read.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tracker.snapshot()
    }

    pub fn state(&self) -> JobState {
        self.tracker.state()
    }

    pub fn job(&self) -> Job {
        self.tracker.job()
    }

    pub fn status_reporter(&self) -> StatusReporter {
        StatusReporter::new(self.tracker.subscribe())
    }

    /// `Idle -> Producing`: spawn the producer over `source`.
    ///
    /// Returns the new generation number.
    pub async fn start_production(&self, source: Box<dyn FrameSource>) -> PipelineResult<u64> {
        let mut inner = self.inner.lock().await;
        let state = self.tracker.state();
        if state != JobState::Idle {
            return Err(PipelineError::invalid_state("start production", state));
        }

        let info = source.info();
        let generation = self
            .tracker
            .begin_generation(info.clone())
            .map_err(|e| PipelineError::invalid_state("start production", e.from))?;

        let logger = JobLogger::new(&self.tracker.job_id(), generation, "controller");
        let fps = info
            .fps
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(self.config.default_fps);
        let cancel = CancellationToken::new();
        let queue = Arc::new(FrameQueue::new(self.config.queue_capacity));
        let store = Arc::new(ResultStore::new(generation));

        let producer_logger = logger.for_stage("producer");
        let span = producer_logger.create_span();
        let producer = Producer::new(
            source,
            Arc::clone(&queue),
            Arc::clone(&self.tracker),
            generation,
            cancel.clone(),
            producer_logger,
        );
        let handle = tokio::spawn(producer.run().instrument(span));

        logger.log_start(&format!(
            "production started (queue capacity {}, {:.2} fps)",
            queue.capacity(),
            fps
        ));
        metrics::record_job_started();

        inner.run = Some(PipelineRun {
            generation,
            cancel,
            queue,
            store,
            producer: Some(handle),
            consumers: Vec::new(),
            logger,
            fps,
            started_at: Instant::now(),
        });
        Ok(generation)
    }

    /// `Producing -> Consuming`: spawn the consumer pool.
    ///
    /// A repeated call while already consuming is a no-op.
    pub async fn start_consumption(&self) -> PipelineResult<()> {
        let mut inner = self.inner.lock().await;
        match self.tracker.state() {
            JobState::Consuming => return Ok(()),
            JobState::Producing => {}
            state => return Err(PipelineError::invalid_state("start consumption", state)),
        }
        let run = inner
            .run
            .as_mut()
            .ok_or_else(|| PipelineError::invalid_state("start consumption", JobState::Idle))?;

        // The producer may have failed since the state check.
        self.tracker
            .transition(run.generation, JobState::Consuming)
            .map_err(|e| PipelineError::invalid_state("start consumption", e.from))?;

        run.consumers = ConsumerPool::spawn(
            self.config.workers,
            ConsumerContext {
                generation: run.generation,
                queue: Arc::clone(&run.queue),
                store: Arc::clone(&run.store),
                tracker: Arc::clone(&self.tracker),
                transform: Arc::clone(&self.transform),
                cancel: run.cancel.clone(),
                logger: run.logger.clone(),
            },
        );
        Ok(())
    }

    /// Stop every task of the active generation, purge both buffers and
    /// move to `Cancelled`.
    ///
    /// Tasks that outlive the grace period are aborted; the job is then
    /// `Failed` with a cancellation timeout, which is also returned.
    pub async fn cancel(&self) -> PipelineResult<ProgressSnapshot> {
        let mut inner = self.inner.lock().await;
        let state = self.tracker.state();
        if !state.is_active() {
            return Err(PipelineError::invalid_state("cancel processing", state));
        }
        let Some(mut run) = inner.run.take() else {
            return Err(PipelineError::invalid_state("cancel processing", state));
        };

        run.logger.log_progress("cancellation requested");
        let stopped = self.stop_tasks(&mut run).await;
        let purged = run.purge_buffers();

        if !stopped {
            let err = PipelineError::CancellationTimeout(self.config.cancel_grace);
            run.logger.log_error(&err.to_string());
            self.tracker.fail(
                run.generation,
                JobFailure::new(FailureKind::CancellationTimeout, err.to_string()),
            );
            return Err(err);
        }

        match self.tracker.transition(run.generation, JobState::Cancelled) {
            Ok(()) => {
                metrics::record_job_cancelled();
                run.logger.log_completion(&format!(
                    "cancelled; purged {} queued and {} stored frames",
                    purged.queued, purged.stored
                ));
            }
            Err(e) => {
                // a job-fatal error won the race; buffers are purged regardless
                run.logger
                    .log_warning(&format!("job stopped before cancellation: {}", e));
            }
        }
        Ok(self.tracker.snapshot())
    }

    /// Stop any tasks, clear both buffers, discard the artifact and reset
    /// the job to `Idle`. Valid in every state; repeating it has no effect.
    pub async fn purge(&self) -> PipelineResult<()> {
        let mut inner = self.inner.lock().await;
        let stopped = self.teardown(&mut inner).await;
        self.tracker.reset();
        if !stopped {
            return Err(PipelineError::CancellationTimeout(self.config.cancel_grace));
        }
        Ok(())
    }

    /// Purge and replace the job identity (new upload).
    pub async fn renew(&self, id: JobId) -> PipelineResult<()> {
        let mut inner = self.inner.lock().await;
        let stopped = self.teardown(&mut inner).await;
        info!("Job renewed as {}", id);
        self.tracker.renew(id);
        if !stopped {
            return Err(PipelineError::CancellationTimeout(self.config.cancel_grace));
        }
        Ok(())
    }

    /// Assemble the output video once every frame has been processed.
    ///
    /// Allowed from `Consuming` with complete results, and from `Failed`
    /// after an encoder failure (frames are retained for the retry). From
    /// `Completed` the existing artifact is returned.
    pub async fn assemble(&self) -> PipelineResult<VideoArtifact> {
        let mut inner = self.inner.lock().await;
        let job = self.tracker.job();

        if job.state == JobState::Completed {
            if let Some(artifact) = &inner.artifact {
                return Ok(artifact.clone());
            }
        }
        let retryable = job.state == JobState::Consuming || job.failed_with(FailureKind::Assembly);
        if !retryable || !job.is_complete() {
            return Err(PipelineError::invalid_state("generate video", job.state));
        }
        let total = job.total_frames.unwrap_or(0);

        let run = inner
            .run
            .as_ref()
            .ok_or_else(|| PipelineError::invalid_state("generate video", job.state))?;
        run.logger.log_start(&format!("assembling {} frames", total));
        let assembly_started = Instant::now();

        let artifact = match self.assembler.assemble(&run.store, total, run.fps).await {
            Ok(artifact) => artifact,
            Err(e) => {
                run.logger.log_error(&e.to_string());
                self.tracker
                    .record_assembly_failure(run.generation, e.to_string());
                return Err(e);
            }
        };

        if let Err(e) = self.tracker.transition(run.generation, JobState::Completed) {
            if let Err(discard) = artifact.discard().await {
                warn!("Failed to discard artifact: {}", discard);
            }
            return Err(PipelineError::invalid_state("generate video", e.from));
        }

        let assembly_secs = assembly_started.elapsed().as_secs_f64();
        if let Some(mut run) = inner.run.take() {
            // consumers have drained the closed queue by now
            self.stop_tasks(&mut run).await;
            run.purge_buffers();
            metrics::record_job_completed(assembly_secs);
            run.logger.log_completion(&format!(
                "{} frames assembled in {:.2}s (job {:.2}s)",
                artifact.frame_count,
                assembly_secs,
                run.started_at.elapsed().as_secs_f64()
            ));
        }
        inner.artifact = Some(artifact.clone());
        Ok(artifact)
    }

    /// Artifact of the completed generation, if any.
    pub async fn artifact(&self) -> Option<VideoArtifact> {
        self.inner.lock().await.artifact.clone()
    }

    /// Current buffer occupancy; zero when no generation is running.
    pub async fn buffer_stats(&self) -> BufferStats {
        let inner = self.inner.lock().await;
        inner
            .run
            .as_ref()
            .map(|run| BufferStats {
                queued: run.queue.len(),
                stored: run.store.len(),
            })
            .unwrap_or_default()
    }

    /// Indices held by the result store, ascending.
    pub async fn result_indices(&self) -> Vec<FrameIndex> {
        let inner = self.inner.lock().await;
        inner
            .run
            .as_ref()
            .map(|run| run.store.indices())
            .unwrap_or_default()
    }

    /// Stop everything before process exit.
    pub async fn shutdown(&self) {
        if let Err(e) = self.purge().await {
            warn!("Pipeline shutdown: {}", e);
        }
    }

    async fn teardown(&self, inner: &mut ControllerInner) -> bool {
        let mut stopped = true;
        if let Some(mut run) = inner.run.take() {
            stopped = self.stop_tasks(&mut run).await;
            let purged = run.purge_buffers();
            run.logger.log_progress(&format!(
                "purged {} queued and {} stored frames",
                purged.queued, purged.stored
            ));
        }
        if let Some(artifact) = inner.artifact.take() {
            if let Err(e) = artifact.discard().await {
                warn!("Failed to discard artifact: {}", e);
            }
        }
        stopped
    }

    /// Cancel the run's token and wait out the grace period. Stragglers are
    /// aborted; returns whether every task stopped on its own.
    async fn stop_tasks(&self, run: &mut PipelineRun) -> bool {
        run.cancel.cancel();

        let producer = run.producer.take();
        let consumers = std::mem::take(&mut run.consumers);
        let aborts: Vec<_> = producer
            .iter()
            .map(|h| h.abort_handle())
            .chain(consumers.iter().map(|h| h.abort_handle()))
            .collect();

        let join_all = async {
            if let Some(producer) = producer {
                if let Err(e) = producer.await {
                    warn!("Producer task ended abnormally: {}", e);
                }
            }
            for consumer in consumers {
                if let Err(e) = consumer.await {
                    warn!("Consumer task ended abnormally: {}", e);
                }
            }
        };

        match tokio::time::timeout(self.config.cancel_grace, join_all).await {
            Ok(()) => true,
            Err(_) => {
                run.logger.log_error(&format!(
                    "tasks still running after {:?}, aborting",
                    self.config.cancel_grace
                ));
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}
