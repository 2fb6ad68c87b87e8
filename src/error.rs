//! Error types for the workq job queue core.

use thiserror::Error;

/// The main error type for the workq library.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The queue is shutting down or already shut down.
    #[error("queue closed")]
    Closed,

    /// A job exhausted its execution attempt budget before it could run.
    #[error("max execute attempts exceeded")]
    MaxAttemptsExceeded,

    /// A task handler returned an error.
    #[error("handler failed: {0}")]
    Handler(String),

    /// A task handler panicked during execution.
    #[error("handler panicked: {0}")]
    HandlerPanic(String),

    /// Graceful shutdown did not finish before the caller's deadline.
    #[error("shutdown deadline exceeded")]
    ShutdownDeadlineExceeded,

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific error.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type alias using QueueError.
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_closed() {
        assert_eq!(format!("{}", QueueError::Closed), "queue closed");
    }

    #[test]
    fn test_error_display_max_attempts() {
        assert_eq!(
            format!("{}", QueueError::MaxAttemptsExceeded),
            "max execute attempts exceeded"
        );
    }

    #[test]
    fn test_error_display_handler() {
        let err = QueueError::Handler("boom".to_string());
        assert_eq!(format!("{}", err), "handler failed: boom");
    }

    #[test]
    fn test_error_display_handler_panic() {
        let err = QueueError::HandlerPanic("index out of bounds".to_string());
        assert_eq!(format!("{}", err), "handler panicked: index out of bounds");
    }

    #[test]
    fn test_error_display_shutdown_deadline() {
        assert_eq!(
            format!("{}", QueueError::ShutdownDeadlineExceeded),
            "shutdown deadline exceeded"
        );
    }

    #[test]
    fn test_error_display_backend() {
        let err = QueueError::Backend("connection refused".to_string());
        assert_eq!(format!("{}", err), "backend error: connection refused");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err: serde_json::Error = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: QueueError = json_err.into();
        assert!(matches!(err, QueueError::Serialization(_)));
    }
}
