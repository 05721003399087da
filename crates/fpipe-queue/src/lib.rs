//! Shared buffers between the producer and the consumer pool.
//!
//! This crate provides:
//! - `FrameQueue`: bounded FIFO with backpressure, close, purge and
//!   cancellation-aware blocking
//! - `ResultStore`: processed frames keyed by index, with ordered reads

pub mod error;
pub mod frame_queue;
pub mod result_store;

pub use error::{QueueError, QueueResult};
pub use frame_queue::FrameQueue;
pub use result_store::ResultStore;
