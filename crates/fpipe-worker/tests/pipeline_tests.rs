//! End-to-end pipeline tests against in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fpipe_media::{
    FrameSource, FrameTransform, MediaBackend, MediaError, MediaResult, MemoryBackend, MemoryEncoder,
    MemoryFrameSource, PassthroughTransform,
};
use fpipe_models::{
    ConsumerStatus, FailureKind, Frame, JobState, ProgressSnapshot, RawFrame, SourceInfo,
};
use fpipe_worker::{JobController, JobService, PipelineConfig, PipelineError};

const WAIT: Duration = Duration::from_secs(10);

fn config(workers: usize, queue_capacity: usize) -> PipelineConfig {
    PipelineConfig {
        workers,
        queue_capacity,
        ..PipelineConfig::default()
    }
}

fn controller_with(
    config: PipelineConfig,
    transform: Arc<dyn FrameTransform>,
) -> (JobController, MemoryEncoder) {
    let encoder = MemoryEncoder::new();
    let controller = JobController::new(config, transform, Arc::new(encoder.clone()));
    (controller, encoder)
}

async fn wait_for<F>(controller: &JobController, predicate: F) -> ProgressSnapshot
where
    F: FnMut(&ProgressSnapshot) -> bool,
{
    tokio::time::timeout(WAIT, controller.status_reporter().wait_until(predicate))
        .await
        .expect("pipeline did not reach the expected state in time")
        .expect("controller dropped")
}

/// Sleeps before passing the frame through.
struct SlowTransform(Duration);

#[async_trait]
impl FrameTransform for SlowTransform {
    fn name(&self) -> &str {
        "slow"
    }

    async fn apply(&self, frame: &Frame) -> MediaResult<Frame> {
        tokio::time::sleep(self.0).await;
        Ok(frame.clone())
    }
}

/// Fails every frame whose index is a multiple of `every`.
struct FlakyTransform {
    every: u64,
}

#[async_trait]
impl FrameTransform for FlakyTransform {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn apply(&self, frame: &Frame) -> MediaResult<Frame> {
        if frame.index % self.every == 0 {
            return Err(MediaError::transform("detector crashed"));
        }
        let data = frame.data.iter().map(|b| b.wrapping_add(100)).collect();
        Ok(frame.with_data(frame.width, frame.height, data))
    }
}

/// Pauses before reporting end-of-stream.
struct LingeringSource {
    inner: MemoryFrameSource,
    linger: Duration,
}

#[async_trait]
impl FrameSource for LingeringSource {
    fn info(&self) -> SourceInfo {
        self.inner.info()
    }

    async fn next_frame(&mut self) -> MediaResult<Option<RawFrame>> {
        match self.inner.next_frame().await? {
            Some(raw) => Ok(Some(raw)),
            None => {
                tokio::time::sleep(self.linger).await;
                Ok(None)
            }
        }
    }
}

/// Ignores cancellation by blocking the worker thread.
struct StuckTransform;

#[async_trait]
impl FrameTransform for StuckTransform {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn apply(&self, frame: &Frame) -> MediaResult<Frame> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(frame.clone())
    }
}

#[tokio::test]
async fn test_scenario_a_ten_frames_assembled_in_order() {
    let (controller, encoder) = controller_with(config(3, 4), Arc::new(PassthroughTransform));

    controller
        .start_production(Box::new(MemoryFrameSource::solid(2, 2, 10)))
        .await
        .unwrap();
    controller.start_consumption().await.unwrap();

    let done = wait_for(&controller, |s| s.completed).await;
    let status = ConsumerStatus::from(&done);
    assert_eq!(status.frames_processed, 10);
    assert_eq!(status.total_frames, 10);
    assert!(status.completed);

    let artifact = controller.assemble().await.unwrap();
    assert_eq!(artifact.frame_count, 10);
    assert_eq!(encoder.written_indices(), (0..10).collect::<Vec<_>>());

    // frame i is filled with byte i
    let bytes = artifact.read_bytes().await.unwrap();
    let firsts: Vec<u8> = bytes.chunks(12).map(|chunk| chunk[0]).collect();
    assert_eq!(firsts, (0..10).collect::<Vec<u8>>());
    assert_eq!(controller.state(), JobState::Completed);

    // a second request returns the same artifact without encoding again
    let again = controller.assemble().await.unwrap();
    assert_eq!(again, artifact);
    assert_eq!(encoder.sessions(), 1);
}

#[tokio::test]
async fn test_scenario_b_cancel_after_ten_frames() {
    let (controller, encoder) = controller_with(
        config(3, 8),
        Arc::new(SlowTransform(Duration::from_millis(5))),
    );

    controller
        .start_production(Box::new(MemoryFrameSource::solid(1, 1, 100)))
        .await
        .unwrap();
    controller.start_consumption().await.unwrap();
    wait_for(&controller, |s| s.frames_processed >= 10).await;

    let snapshot = controller.cancel().await.unwrap();
    assert_eq!(snapshot.state, JobState::Cancelled);
    assert!(snapshot.frames_processed >= 10);
    assert!(snapshot.frames_processed < 100);
    assert_eq!(controller.buffer_stats().await.queued, 0);
    assert_eq!(controller.buffer_stats().await.stored, 0);
    assert!(controller.result_indices().await.is_empty());

    // counters stay frozen once cancelled
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(controller.snapshot().frames_processed, snapshot.frames_processed);

    // cancelling again is rejected without side effects
    assert!(controller.cancel().await.unwrap_err().is_invalid_state());
    assert!(controller
        .start_production(Box::new(MemoryFrameSource::solid(1, 1, 5)))
        .await
        .unwrap_err()
        .is_invalid_state());

    // after a purge the next generation starts clean
    controller.purge().await.unwrap();
    let generation = controller
        .start_production(Box::new(MemoryFrameSource::solid(1, 1, 5)))
        .await
        .unwrap();
    assert_eq!(generation, 2);
    controller.start_consumption().await.unwrap();
    let done = wait_for(&controller, |s| s.completed).await;
    assert_eq!(done.frames_processed, 5);
    assert_eq!(controller.result_indices().await, vec![0, 1, 2, 3, 4]);

    controller.assemble().await.unwrap();
    assert_eq!(encoder.written_indices(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_scenario_c_decode_failure_at_frame_five() {
    let (controller, encoder) = controller_with(config(2, 16), Arc::new(PassthroughTransform));

    controller
        .start_production(Box::new(
            MemoryFrameSource::solid(1, 1, 10).fail_at(5, "corrupt packet"),
        ))
        .await
        .unwrap();
    controller.start_consumption().await.ok();

    let failed = wait_for(&controller, |s| s.state == JobState::Failed).await;
    assert!(failed.error.as_deref().unwrap().starts_with("decode_error"));
    assert!(failed.frames_processed <= 5);
    assert!(!failed.completed);

    // frozen
    tokio::time::sleep(Duration::from_millis(50)).await;
    let later = controller.snapshot();
    assert_eq!(later.frames_processed, failed.frames_processed);
    assert!(controller.job().failed_with(FailureKind::Decode));

    // results retained for diagnostics
    let stored = controller.result_indices().await;
    assert!(stored.len() as u64 >= later.frames_processed);
    assert!(stored.iter().all(|&i| i < 5));

    assert!(controller.assemble().await.unwrap_err().is_invalid_state());
    assert_eq!(encoder.sessions(), 0);

    controller.purge().await.unwrap();
    assert_eq!(controller.state(), JobState::Idle);
    assert!(controller.result_indices().await.is_empty());
}

#[tokio::test]
async fn test_frames_processed_is_monotonic_and_bounded() {
    let (controller, _) = controller_with(
        config(4, 4),
        Arc::new(SlowTransform(Duration::from_millis(1))),
    );
    controller
        .start_production(Box::new(MemoryFrameSource::solid(1, 1, 60)))
        .await
        .unwrap();
    controller.start_consumption().await.unwrap();

    let reporter = controller.status_reporter();
    let mut last = 0;
    loop {
        let snapshot = reporter.snapshot();
        assert!(snapshot.frames_processed >= last);
        if let Some(total) = snapshot.total_frames {
            assert!(snapshot.frames_processed <= total);
        }
        let status = ConsumerStatus::from(&snapshot);
        assert!(status.total_frames == 0 || status.frames_processed <= status.total_frames);
        last = snapshot.frames_processed;
        if snapshot.completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(last, 60);
}

#[tokio::test]
async fn test_understated_frame_hint_is_not_reported_as_total() {
    let (controller, _) = controller_with(config(2, 4), Arc::new(PassthroughTransform));
    let frames = (0..10u8).map(|i| RawFrame::new(1, 1, vec![i; 3])).collect();
    let source = LingeringSource {
        inner: MemoryFrameSource::new(
            SourceInfo {
                width: 1,
                height: 1,
                fps: Some(25.0),
                frame_count_hint: Some(3),
            },
            frames,
        ),
        linger: Duration::from_millis(200),
    };
    controller.start_production(Box::new(source)).await.unwrap();
    controller.start_consumption().await.unwrap();

    // every frame is processed while end-of-stream is still pending
    let mid = wait_for(&controller, |s| s.frames_processed == 10).await;
    let status = ConsumerStatus::from(&mid);
    assert_eq!(status.frames_processed, 10);
    assert_eq!(status.total_frames, 0);
    assert_eq!(status.estimated_total_frames, Some(3));
    assert!(!status.completed);

    let done = wait_for(&controller, |s| s.completed).await;
    let status = ConsumerStatus::from(&done);
    assert_eq!(status.total_frames, 10);
    assert_eq!(status.estimated_total_frames, None);
    assert!(status.completed);
}

#[tokio::test]
async fn test_purge_twice_equals_once() {
    let (controller, _) = controller_with(config(2, 4), Arc::new(PassthroughTransform));
    controller
        .start_production(Box::new(MemoryFrameSource::solid(1, 1, 40)))
        .await
        .unwrap();
    controller.start_consumption().await.unwrap();

    controller.purge().await.unwrap();
    let once = controller.snapshot();
    controller.purge().await.unwrap();
    let twice = controller.snapshot();

    assert_eq!(once.state, JobState::Idle);
    assert_eq!(twice.state, JobState::Idle);
    assert_eq!(once.frames_processed, twice.frames_processed);
    assert_eq!(once.generation, twice.generation);
    assert!(controller.result_indices().await.is_empty());
}

#[tokio::test]
async fn test_start_consumer_twice_is_noop() {
    let (controller, _) = controller_with(config(2, 4), Arc::new(PassthroughTransform));
    controller
        .start_production(Box::new(MemoryFrameSource::solid(1, 1, 8)))
        .await
        .unwrap();
    controller.start_consumption().await.unwrap();
    controller.start_consumption().await.unwrap();

    let done = wait_for(&controller, |s| s.completed).await;
    assert_eq!(done.frames_processed, 8);
}

#[tokio::test]
async fn test_failed_frames_pass_through_below_threshold() {
    let (controller, encoder) = controller_with(
        PipelineConfig {
            max_frame_error_rate: 0.5,
            min_frames_for_error_rate: 4,
            ..config(2, 4)
        },
        Arc::new(FlakyTransform { every: 4 }),
    );
    controller
        .start_production(Box::new(MemoryFrameSource::solid(1, 1, 12)))
        .await
        .unwrap();
    controller.start_consumption().await.unwrap();

    let done = wait_for(&controller, |s| s.completed).await;
    assert_eq!(done.frames_processed, 12);
    assert_eq!(done.frames_failed, 3);

    let artifact = controller.assemble().await.unwrap();
    assert_eq!(encoder.written_indices(), (0..12).collect::<Vec<_>>());
    let bytes = artifact.read_bytes().await.unwrap();
    // frame 4 failed and keeps its pixels; frame 5 was transformed
    assert_eq!(bytes[4 * 3], 4);
    assert_eq!(bytes[5 * 3], 105);
}

#[tokio::test]
async fn test_error_rate_over_threshold_fails_job() {
    let (controller, _) = controller_with(
        PipelineConfig {
            max_frame_error_rate: 0.25,
            min_frames_for_error_rate: 8,
            ..config(1, 4)
        },
        Arc::new(FlakyTransform { every: 2 }),
    );
    controller
        .start_production(Box::new(MemoryFrameSource::solid(1, 1, 50)))
        .await
        .unwrap();
    controller.start_consumption().await.unwrap();

    let failed = wait_for(&controller, |s| s.state == JobState::Failed).await;
    assert!(controller.job().failed_with(FailureKind::FrameProcessing));
    // the budget is checked on failures: frame 8 is the first failure
    // after eight attempts
    assert_eq!(failed.frames_processed, 9);
    assert_eq!(failed.frames_failed, 5);
    assert!(controller.assemble().await.unwrap_err().is_invalid_state());
}

#[tokio::test]
async fn test_assembly_failure_can_be_retried() {
    let (controller, encoder) = controller_with(config(2, 4), Arc::new(PassthroughTransform));
    controller
        .start_production(Box::new(MemoryFrameSource::solid(1, 1, 6)))
        .await
        .unwrap();
    controller.start_consumption().await.unwrap();
    wait_for(&controller, |s| s.completed).await;

    encoder.set_failure(Some("disk full".to_string()));
    let err = controller.assemble().await.unwrap_err();
    assert!(matches!(err, PipelineError::Assembly(_)));
    assert!(controller.job().failed_with(FailureKind::Assembly));
    assert_eq!(controller.result_indices().await.len(), 6);

    encoder.set_failure(None);
    let artifact = controller.assemble().await.unwrap();
    assert_eq!(artifact.frame_count, 6);
    assert_eq!(controller.state(), JobState::Completed);
    assert!(controller.snapshot().error.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_timeout_fails_job() {
    let (controller, _) = controller_with(
        PipelineConfig {
            cancel_grace: Duration::from_millis(20),
            ..config(1, 4)
        },
        Arc::new(StuckTransform),
    );
    controller
        .start_production(Box::new(MemoryFrameSource::solid(1, 1, 20)))
        .await
        .unwrap();
    controller.start_consumption().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = controller.cancel().await.unwrap_err();
    assert!(matches!(err, PipelineError::CancellationTimeout(_)));
    assert!(controller.job().failed_with(FailureKind::CancellationTimeout));
    assert!(controller.result_indices().await.is_empty());

    controller.purge().await.unwrap();
    assert_eq!(controller.state(), JobState::Idle);
}

#[tokio::test]
async fn test_service_upload_to_download() {
    let dir = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::rawvideo(2, 1, 24.0);
    let encoder = backend.memory_encoder();
    let backend: Arc<dyn MediaBackend> = Arc::new(backend);
    let service = JobService::new(
        PipelineConfig {
            work_dir: dir.path().to_path_buf(),
            ..config(3, 4)
        },
        backend,
        Arc::new(PassthroughTransform),
    );

    assert!(matches!(
        service.start_producer().await.unwrap_err(),
        PipelineError::NotFound(_)
    ));
    assert!(matches!(
        service.upload("clip.rgb", &[]).await.unwrap_err(),
        PipelineError::InvalidUpload(_)
    ));

    // eight 2x1 RGB24 frames, frame i filled with byte i
    let video: Vec<u8> = (0..8u8).flat_map(|i| vec![i; 6]).collect();
    let receipt = service.upload("clip.rgb", &video).await.unwrap();
    assert_eq!(receipt.bytes, 48);
    assert_eq!(service.status().job_id, receipt.job_id);

    service.start_producer().await.unwrap();
    service.start_consumer().await.unwrap();
    tokio::time::timeout(
        WAIT,
        service.controller().status_reporter().wait_until(|s| s.completed),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(service.consumer_status().completed);

    assert!(matches!(
        service.download_video().await.unwrap_err(),
        PipelineError::NotFound(_)
    ));
    service.generate_video().await.unwrap();
    let download = service.download_video().await.unwrap();
    assert_eq!(download.bytes, video);
    assert_eq!(download.file_name, "processed_video.mp4");
    assert_eq!(encoder.written_indices(), (0..8).collect::<Vec<_>>());

    // a new upload resets the job under a fresh ID
    let second = service.upload("again.rgb", &video).await.unwrap();
    assert_ne!(second.job_id, receipt.job_id);
    assert_eq!(service.status().state, JobState::Idle);
    assert!(service.controller().artifact().await.is_none());

    service.shutdown().await;
}
