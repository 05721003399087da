//! Bounded FIFO between the producer and the consumer pool.
//!
//! Both blocking operations race their wait against a `CancellationToken`,
//! so a task parked on a full or empty queue always wakes on cancellation.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use fpipe_models::Frame;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{QueueError, QueueResult};

#[derive(Debug, Default)]
struct QueueInner {
    frames: VecDeque<Frame>,
    closed: bool,
    pushed: u64,
    popped: u64,
}

/// Multi-producer, multi-consumer bounded frame queue.
///
/// Frames leave in insertion order and are never duplicated or dropped,
/// except by an explicit [`FrameQueue::purge`].
#[derive(Debug)]
pub struct FrameQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
    not_empty: Notify,
    not_full: Notify,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(QueueInner::default()),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a frame, waiting while the queue is full.
    ///
    /// Fails with `Cancelled` if the token fires first (the frame is dropped,
    /// never partially enqueued) and with `Closed` after [`FrameQueue::close`].
    pub async fn push(&self, frame: Frame, cancel: &CancellationToken) -> QueueResult<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }

            // Register interest before checking, so a pop between the check
            // and the await still wakes us.
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(QueueError::Closed);
                }
                if inner.frames.len() < self.capacity {
                    inner.frames.push_back(frame);
                    inner.pushed += 1;
                    drop(inner);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                _ = &mut notified => {}
            }
        }
    }

    /// Take the oldest frame, waiting while the queue is empty.
    ///
    /// Returns `Ok(None)` once the queue is closed and drained.
    pub async fn pop(&self, cancel: &CancellationToken) -> QueueResult<Option<Frame>> {
        loop {
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }

            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(frame) = inner.frames.pop_front() {
                    inner.popped += 1;
                    drop(inner);
                    self.not_full.notify_one();
                    return Ok(Some(frame));
                }
                if inner.closed {
                    return Ok(None);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                _ = &mut notified => {}
            }
        }
    }

    /// Signal end-of-stream. Queued frames remain poppable; pushes fail.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Drop every queued frame. Returns how many were discarded.
    pub fn purge(&self) -> usize {
        let discarded = {
            let mut inner = self.lock();
            let discarded = inner.frames.len();
            inner.frames.clear();
            discarded
        };
        if discarded > 0 {
            debug!("Purged {} queued frames", discarded);
        }
        self.not_full.notify_waiters();
        discarded
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames accepted by `push` since creation.
    pub fn pushed(&self) -> u64 {
        self.lock().pushed
    }

    /// Total frames handed out by `pop` since creation.
    pub fn popped(&self) -> u64 {
        self.lock().popped
    }
}
