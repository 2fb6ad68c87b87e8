//! Configuration for the queue manager.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::QueueError;
use crate::job::Payload;
use crate::task::TaskResult;

/// Queue-level callback invoked after a job's final failure, with the payload
/// and the triggering error. Errors it returns are swallowed; a failure
/// notification must never crash a worker.
pub type FailedJobHandler = Arc<dyn Fn(&Payload, &QueueError) -> TaskResult + Send + Sync>;

/// Configuration for the [`Manager`](crate::Manager).
#[derive(Clone)]
pub struct QueueConfig {
    /// Number of parallel worker tasks.
    pub concurrency: usize,
    /// Threshold for duplicate in-flight detection and long-running warnings.
    /// Also the delay applied when a duplicate delivery is re-enqueued.
    pub max_execute_duration: Duration,
    /// Optional callback for jobs that reach final failure.
    pub failed_job_handler: Option<FailedJobHandler>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_execute_duration: Duration::from_secs(300),
            failed_job_handler: None,
        }
    }
}

impl fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConfig")
            .field("concurrency", &self.concurrency)
            .field("max_execute_duration", &self.max_execute_duration)
            .field("failed_job_handler", &self.failed_job_handler.is_some())
            .finish()
    }
}

impl QueueConfig {
    /// Create a new builder.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::new()
    }
}

/// Builder for [`QueueConfig`].
#[derive(Default)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl QueueConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of parallel workers.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Set the maximum execution duration.
    pub fn max_execute_duration(mut self, duration: Duration) -> Self {
        self.config.max_execute_duration = duration;
        self
    }

    /// Set the failed-job callback.
    pub fn failed_job_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Payload, &QueueError) -> TaskResult + Send + Sync + 'static,
    {
        self.config.failed_job_handler = Some(Arc::new(handler));
        self
    }

    /// Build the QueueConfig.
    pub fn build(self) -> QueueConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_execute_duration, Duration::from_secs(300));
        assert!(config.failed_job_handler.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = QueueConfig::builder()
            .concurrency(8)
            .max_execute_duration(Duration::from_secs(60))
            .failed_job_handler(|_payload, _err| Ok(()))
            .build();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.max_execute_duration, Duration::from_secs(60));
        assert!(config.failed_job_handler.is_some());
    }

    #[test]
    fn test_config_debug_hides_handler() {
        let config = QueueConfig::builder()
            .failed_job_handler(|_payload, _err| Ok(()))
            .build();
        let debug = format!("{:?}", config);
        assert!(debug.contains("failed_job_handler: true"));
    }
}
