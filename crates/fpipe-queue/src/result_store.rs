//! Processed frames keyed by index.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fpipe_models::{Frame, FrameIndex};
use tracing::debug;

use crate::error::{QueueError, QueueResult};

#[derive(Debug, Default)]
struct StoreInner {
    generation: u64,
    frames: BTreeMap<FrameIndex, Arc<Frame>>,
}

/// Out-of-order writes, in-order reads.
///
/// Writes carry the pipeline generation they belong to. A purge bumps the
/// store's generation, so a worker finishing after a purge cannot leak a
/// stale frame into the next run.
#[derive(Debug, Default)]
pub struct ResultStore {
    inner: Mutex<StoreInner>,
}

impl ResultStore {
    pub fn new(generation: u64) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                generation,
                frames: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a processed frame under its index. Each index is written at most once.
    pub fn insert(&self, generation: u64, frame: Frame) -> QueueResult<()> {
        let mut inner = self.lock();
        if generation != inner.generation {
            return Err(QueueError::StaleGeneration {
                write: generation,
                current: inner.generation,
            });
        }
        if inner.frames.contains_key(&frame.index) {
            return Err(QueueError::DuplicateIndex(frame.index));
        }
        inner.frames.insert(frame.index, Arc::new(frame));
        Ok(())
    }

    pub fn get(&self, index: FrameIndex) -> Option<Arc<Frame>> {
        self.lock().frames.get(&index).cloned()
    }

    pub fn contains(&self, index: FrameIndex) -> bool {
        self.lock().frames.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Frames `0..total` in index order. Fails on the first gap.
    pub fn ordered(&self, total: u64) -> QueueResult<Vec<Arc<Frame>>> {
        let inner = self.lock();
        (0..total)
            .map(|index| {
                inner
                    .frames
                    .get(&index)
                    .cloned()
                    .ok_or(QueueError::MissingIndex(index))
            })
            .collect()
    }

    /// Indices currently stored, ascending.
    pub fn indices(&self) -> Vec<FrameIndex> {
        self.lock().frames.keys().copied().collect()
    }

    /// Clear every entry atomically and reject writes from the old generation.
    pub fn purge(&self) -> usize {
        let mut inner = self.lock();
        let discarded = inner.frames.len();
        inner.frames.clear();
        inner.generation += 1;
        if discarded > 0 {
            debug!("Purged {} stored results", discarded);
        }
        discarded
    }
}
