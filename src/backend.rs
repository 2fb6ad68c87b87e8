//! Backend abstraction for job queue storage.
//!
//! The execution core consumes a small capability set from whatever durable
//! transport backs the queues; everything else about storage stays behind
//! this trait. Terminal per-job actions (delete, release, mark-failed) live
//! on the [`Job`] handle the backend produces at pop time.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::job::{Job, Payload};

/// Storage capability set consumed by the scheduler.
///
/// Implementations must be thread-safe; the looper and every worker hold the
/// same instance. The backend owns the attempt counter: each pop of a payload
/// redelivers it with the counter incremented.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Pop one ready job from the named queue.
    ///
    /// Returns `None` when nothing is ready, including when delayed jobs
    /// exist but their delay has not elapsed.
    async fn pop(&self, queue: &str) -> Result<Option<Box<dyn Job>>>;

    /// Enqueue a payload as a delayed job, eligible for pop after `delay`.
    ///
    /// `attempts` seeds the re-enqueued job's attempt count; a deferred
    /// delivery keeps its prior attempts so re-enqueueing cannot stretch a
    /// job's retry budget.
    async fn later(&self, queue: &str, delay: Duration, payload: &Payload, attempts: u32)
        -> Result<()>;
}

/// A type-erased queue backend shared between the looper and the workers.
pub type DynQueue = Arc<dyn Queue>;
