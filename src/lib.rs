//! # workq - Job Queue Execution Core
//!
//! The execution core of a background job-queue runtime: named queues backed
//! by an external storage transport, a polling looper that fans work in from
//! every registered queue, a bounded worker pool, per-job timeout and retry
//! limits, and graceful bounded-wait shutdown.
//!
//! ## Features
//!
//! - **Multi-queue polling**: one looper round-robins every registered queue
//!   in randomized order, so no queue is starved
//! - **Bounded worker pool**: jobs are handed off through a rendezvous, which
//!   throttles polling to actual worker capacity
//! - **Retries with attempt limits**: failed or panicking handlers release
//!   the job for another attempt until its budget runs out
//! - **Duplicate-execution guard**: a redelivery of a job still in flight is
//!   deferred instead of run twice concurrently
//! - **Graceful shutdown**: in-flight jobs get a bounded window to finish
//!
//! Delivery is at-least-once: a long-running execution can overlap its own
//! redelivery, so handlers must be idempotent.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use workq::{Manager, MemoryQueue, QueueConfig, Task, TaskContext, TaskResult};
//!
//! struct EmailTask;
//!
//! #[async_trait]
//! impl Task for EmailTask {
//!     fn name(&self) -> &str {
//!         "email"
//!     }
//!
//!     fn max_tries(&self) -> u32 {
//!         3
//!     }
//!
//!     fn retry_interval(&self) -> Duration {
//!         Duration::from_secs(5)
//!     }
//!
//!     async fn execute(&self, _ctx: &TaskContext, body: &serde_json::Value) -> TaskResult {
//!         println!("sending email: {body}");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> workq::Result<()> {
//!     let queue = MemoryQueue::new();
//!     queue.push("email", serde_json::json!({"to": "user@example.com"}), 3, Duration::from_secs(5));
//!
//!     let manager = Manager::new(queue, QueueConfig::builder().concurrency(4).build());
//!     manager.bootstrap(vec![Arc::new(EmailTask)])?;
//!     manager.start()?;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     manager.shutdown(Duration::from_secs(30)).await
//! }
//! ```

mod backend;
mod config;
mod error;
mod job;
mod looper;
mod manager;
mod memory;
mod task;
mod worker;

// Re-export main types
pub use backend::{DynQueue, Queue};
pub use config::{FailedJobHandler, QueueConfig, QueueConfigBuilder};
pub use error::{QueueError, Result};
pub use job::{Job, Payload};
pub use manager::Manager;
pub use memory::MemoryQueue;
pub use task::{Task, TaskContext, TaskError, TaskResult};
