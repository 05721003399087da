//! Producer task: decode the source into the frame queue.

use std::sync::Arc;

use fpipe_media::FrameSource;
use fpipe_models::{FailureKind, Frame, FrameIndex, JobFailure};
use fpipe_queue::{FrameQueue, QueueError};
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::logging::JobLogger;
use crate::metrics;
use crate::tracker::JobTracker;

/// How a producer run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerOutcome {
    /// End-of-stream reached; every frame was enqueued and the queue closed
    Finished { total: u64 },
    /// Stopped by the cancellation token
    Cancelled { pushed: u64 },
    /// The source could not continue; the job was failed
    Failed(String),
}

/// Reads frames from a source and pushes them, indexed `0..N`, into the queue.
pub struct Producer {
    source: Box<dyn FrameSource>,
    queue: Arc<FrameQueue>,
    tracker: Arc<JobTracker>,
    generation: u64,
    cancel: CancellationToken,
    logger: JobLogger,
}

impl Producer {
    pub fn new(
        source: Box<dyn FrameSource>,
        queue: Arc<FrameQueue>,
        tracker: Arc<JobTracker>,
        generation: u64,
        cancel: CancellationToken,
        logger: JobLogger,
    ) -> Self {
        Self {
            source,
            queue,
            tracker,
            generation,
            cancel,
            logger,
        }
    }

    /// Run until end-of-stream, cancellation or a decode error.
    ///
    /// At end-of-stream the exact total is recorded before the queue is
    /// closed. A decode error fails the job, cancels the other tasks and
    /// purges the queue; frames already processed stay in the result store.
    pub async fn run(mut self) -> ProducerOutcome {
        let info = self.source.info();
        self.logger.log_start(&format!(
            "decoding {}x{} source ({} frames expected)",
            info.width,
            info.height,
            info.frame_count_hint
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ));

        let outcome = self.produce().await;
        self.source.close().await;

        match &outcome {
            ProducerOutcome::Finished { total } => {
                self.logger
                    .log_completion(&format!("{} frames enqueued", total));
            }
            ProducerOutcome::Cancelled { pushed } => {
                self.logger
                    .log_progress(&format!("cancelled after {} frames", pushed));
            }
            ProducerOutcome::Failed(message) => {
                let err = PipelineError::decode(message.clone());
                self.logger.log_error(&err.to_string());
                let failed = self.tracker.fail(
                    self.generation,
                    JobFailure::new(FailureKind::Decode, message.clone()),
                );
                if failed {
                    self.cancel.cancel();
                    self.queue.purge();
                }
            }
        }
        outcome
    }

    async fn produce(&mut self) -> ProducerOutcome {
        let mut index: FrameIndex = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return ProducerOutcome::Cancelled { pushed: index };
                }
                next = self.source.next_frame() => next,
            };

            let raw = match next {
                Ok(Some(raw)) => raw,
                Ok(None) if index == 0 => {
                    return ProducerOutcome::Failed("video contains no frames".to_string());
                }
                Ok(None) => {
                    self.tracker.record_total_frames(self.generation, index);
                    self.queue.close();
                    return ProducerOutcome::Finished { total: index };
                }
                Err(e) => {
                    return ProducerOutcome::Failed(format!("frame {}: {}", index, e));
                }
            };

            metrics::record_frame_decoded();
            match self.queue.push(Frame::from_raw(index, raw), &self.cancel).await {
                Ok(()) => {
                    index += 1;
                    metrics::record_queue_depth(self.queue.len());
                }
                Err(QueueError::Cancelled) | Err(QueueError::Closed) => {
                    return ProducerOutcome::Cancelled { pushed: index };
                }
                Err(e) => return ProducerOutcome::Failed(e.to_string()),
            }
        }
    }
}
