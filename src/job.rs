//! Job handle and payload types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::error::Result;

/// The durable part of a job: what the backend stores and redelivers.
///
/// The `id` is unique per dequeued unit, but a delayed re-enqueue of the same
/// logical job keeps its id; the duplicate-execution guard relies on that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    /// Opaque payload identifier.
    pub id: String,
    /// Maximum number of execution attempts before the job is marked failed.
    pub max_tries: u32,
    /// Delay before a failed job becomes eligible for another attempt.
    #[serde(with = "duration_millis")]
    pub retry_interval: Duration,
    /// Raw job body handed to the task handler.
    pub body: serde_json::Value,
}

impl Payload {
    /// Create a new payload.
    pub fn new(
        id: impl Into<String>,
        max_tries: u32,
        retry_interval: Duration,
        body: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            max_tries,
            retry_interval,
            body,
        }
    }
}

/// One dequeued unit of work.
///
/// A job handle is created by the backend at pop time and terminated by
/// exactly one of `delete` (done), `release` (retry later), or `mark_failed`
/// followed by `delete` (budget exhausted). Implementations carry whatever
/// backend state they need to honor those terminal actions.
#[async_trait]
pub trait Job: Send + Sync {
    /// Name of the queue this job was popped from.
    fn queue(&self) -> &str;

    /// The job payload.
    fn payload(&self) -> &Payload;

    /// Execution attempts so far, including the current delivery.
    /// Incremented by the backend on every pop.
    fn attempts(&self) -> u32;

    /// When the backend handed this job out.
    fn popped_at(&self) -> Instant;

    /// Execution timeout handed to the task's context.
    fn timeout(&self) -> Duration;

    /// Remove the job from the backend. Terminal.
    async fn delete(&self) -> Result<()>;

    /// Whether a previous terminal action already deleted the job.
    fn is_deleted(&self) -> bool;

    /// Put the job back on its queue, eligible for re-pop after `delay`.
    async fn release(&self, delay: Duration) -> Result<()>;

    /// Record the job as failed in the backend. The handle stays valid;
    /// the caller still deletes it afterwards.
    async fn mark_failed(&self) -> Result<()>;
}

/// Serde module for Duration as integer milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_creation() {
        let payload = Payload::new(
            "job-1",
            3,
            Duration::from_secs(5),
            json!({ "to": "user@example.com" }),
        );
        assert_eq!(payload.id, "job-1");
        assert_eq!(payload.max_tries, 3);
        assert_eq!(payload.retry_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_payload_serde_roundtrip() {
        let payload = Payload::new(
            "job-2",
            5,
            Duration::from_millis(1500),
            json!({ "report": "daily" }),
        );
        let json = serde_json::to_string(&payload).unwrap();
        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "job-2");
        assert_eq!(back.max_tries, 5);
        assert_eq!(back.retry_interval, Duration::from_millis(1500));
        assert_eq!(back.body, json!({ "report": "daily" }));
    }

    #[test]
    fn test_retry_interval_serialized_as_millis() {
        let payload = Payload::new("job-3", 1, Duration::from_secs(2), json!(null));
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["retry_interval"], json!(2000));
    }
}
