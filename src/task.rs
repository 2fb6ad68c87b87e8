//! Task handler trait and the cooperative execution context.

use async_trait::async_trait;
use std::time::{Duration, Instant};

use crate::error::QueueError;
use crate::job::Payload;

/// Result type for task handlers.
pub type TaskResult = std::result::Result<(), TaskError>;

/// Error returned from task handlers.
#[derive(Debug)]
pub struct TaskError {
    /// Error message.
    pub message: String,
}

impl TaskError {
    /// Create a new task error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl<E: std::error::Error> From<E> for TaskError {
    fn from(err: E) -> Self {
        Self::new(err.to_string())
    }
}

/// Deadline-bound context handed to a task handler.
///
/// The deadline is cooperative: a handler that wants to honor its timeout
/// checks [`TaskContext::is_expired`] or selects on [`TaskContext::expired`].
/// The scheduler never aborts a handler that ignores the deadline; it only
/// flags the job as long-running and guards against duplicate execution.
#[derive(Debug, Clone)]
pub struct TaskContext {
    deadline: Instant,
}

impl TaskContext {
    pub(crate) fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    /// The instant after which the job counts as timed out.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.remaining() == Duration::ZERO
    }

    /// Resolves once the deadline has passed. Cooperative handlers select on
    /// this against their own work.
    pub async fn expired(&self) {
        tokio::time::sleep(self.remaining()).await;
    }
}

/// A registered business handler bound to one queue name.
///
/// Tasks are registered during bootstrap and read-only afterwards; the
/// registry gives no synchronization for registering once scheduling runs.
#[async_trait]
pub trait Task: Send + Sync {
    /// Queue name this task consumes. Unique key in the registry.
    fn name(&self) -> &str;

    /// Maximum execution attempts before a job is marked failed.
    fn max_tries(&self) -> u32;

    /// Delay applied when a failed job is released for another attempt.
    fn retry_interval(&self) -> Duration;

    /// Execute one job body. Returning an error routes the job into the
    /// retry-or-fail decision; panics are captured and treated the same way.
    async fn execute(&self, ctx: &TaskContext, body: &serde_json::Value) -> TaskResult;

    /// Called once when a job of this task reaches final failure.
    async fn failed(&self, payload: &Payload, error: &QueueError) {
        let _ = (payload, error);
    }
}
