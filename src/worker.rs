//! Execution actor: consumes handed-off jobs and drives each through the
//! duplicate-guard / attempt-check / timeout / retry state machine.

use std::collections::hash_map::Entry;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex, Semaphore};

use crate::error::QueueError;
use crate::job::Job;
use crate::manager::Shared;
use crate::task::{Task, TaskContext};

/// One of N independent worker actors.
///
/// A worker pulls one job at a time from the shared handoff channel and runs
/// it to a terminal action. A closed, drained channel is the only exit
/// condition; workers never stop early on their own.
pub(crate) struct Worker {
    id: usize,
    shared: Arc<Shared>,
    handoff: Arc<Mutex<mpsc::Receiver<Box<dyn Job>>>>,
    idle_workers: Arc<Semaphore>,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        shared: Arc<Shared>,
        handoff: Arc<Mutex<mpsc::Receiver<Box<dyn Job>>>>,
        idle_workers: Arc<Semaphore>,
    ) -> Self {
        Self {
            id,
            shared,
            handoff,
            idle_workers,
        }
    }

    pub(crate) async fn run(self) {
        tracing::info!(worker_id = self.id, "queue worker started");

        loop {
            // The receiver lock is held only while waiting for a job, never
            // across its execution.
            let job = {
                let mut handoff = self.handoff.lock().await;
                handoff.recv().await
            };

            let Some(job) = job else {
                break;
            };

            self.shared.set_worker_busy(self.id, true);
            self.run_job(job.as_ref()).await;
            self.shared.set_worker_busy(self.id, false);
            self.idle_workers.add_permits(1);
        }

        tracing::info!(worker_id = self.id, "queue worker exited");
    }

    /// The job execution state machine.
    async fn run_job(&self, job: &dyn Job) {
        let payload_id = job.payload().id.clone();

        let Some(task) = self.shared.task(job.queue()) else {
            tracing::warn!(
                worker_id = self.id,
                queue = job.queue(),
                "no task registered for queue"
            );
            return;
        };

        // Duplicate guard: a previous delivery of this payload has not
        // reported completion. There is no forced cancellation on timeout, so
        // a hung handler keeps its entry alive; push this delivery back as a
        // delayed job and let the original finish. The original may still
        // succeed, meaning a job can execute twice; handlers must be
        // idempotent. Check and claim happen under a single lock acquisition
        // so two workers holding the same payload id cannot both pass.
        let duplicate = match self
            .shared
            .in_flight
            .lock()
            .expect("in-flight set mutex poisoned")
            .entry(payload_id.clone())
        {
            Entry::Occupied(_) => true,
            Entry::Vacant(slot) => {
                slot.insert(self.id);
                false
            }
        };
        if duplicate {
            tracing::warn!(
                worker_id = self.id,
                queue = job.queue(),
                payload_id = %payload_id,
                "previous execution still in flight, deferring delivery"
            );
            let delay = self.shared.config.max_execute_duration;
            // The deferred delivery never ran, so only prior attempts carry.
            let attempts = job.attempts().saturating_sub(1);
            if let Err(e) = self
                .shared
                .queue
                .later(job.queue(), delay, job.payload(), attempts)
                .await
            {
                tracing::error!(queue = job.queue(), error = %e, "failed to defer duplicate delivery");
            }
            return;
        }

        if self.fail_if_already_exceeded(job, task.as_ref()).await {
            self.remove_in_flight(&payload_id);
            return;
        }

        tracing::info!(
            worker_id = self.id,
            queue = job.queue(),
            payload_id = %payload_id,
            attempts = job.attempts(),
            "processing job"
        );

        let ctx = TaskContext::with_timeout(job.timeout());
        let outcome = AssertUnwindSafe(task.execute(&ctx, &job.payload().body))
            .catch_unwind()
            .await;

        // The entry comes out on every exit path, panic included.
        self.remove_in_flight(&payload_id);

        let duration_ms = job.popped_at().elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(())) => {
                tracing::info!(
                    worker_id = self.id,
                    queue = job.queue(),
                    payload_id = %payload_id,
                    duration_ms,
                    "job processed"
                );
                if let Err(e) = job.delete().await {
                    tracing::error!(queue = job.queue(), error = %e, "failed to delete finished job");
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    worker_id = self.id,
                    queue = job.queue(),
                    payload_id = %payload_id,
                    duration_ms,
                    error = %err.message,
                    "job failed"
                );
                self.fail_or_release(job, task.as_ref(), QueueError::Handler(err.message))
                    .await;
            }
            Err(panic) => {
                let message = panic_message(panic);
                tracing::error!(
                    worker_id = self.id,
                    queue = job.queue(),
                    payload_id = %payload_id,
                    duration_ms,
                    panic = %message,
                    "job panicked"
                );
                self.fail_or_release(job, task.as_ref(), QueueError::HandlerPanic(message))
                    .await;
            }
        }
    }

    /// Pre-execution attempt check. Returns true when the job must not run
    /// because its attempt budget was spent before this delivery.
    async fn fail_if_already_exceeded(&self, job: &dyn Job, task: &dyn Task) -> bool {
        self.warn_if_long_running(job);

        if job.attempts() <= job.payload().max_tries {
            return false;
        }

        self.fail_job(job, task, QueueError::MaxAttemptsExceeded)
            .await;
        true
    }

    /// Post-execution attempt check: release for another attempt while budget
    /// remains, otherwise run the fail-job transition with the error that
    /// caused this failure.
    async fn fail_or_release(&self, job: &dyn Job, task: &dyn Task, error: QueueError) {
        self.warn_if_long_running(job);

        if job.attempts() >= job.payload().max_tries {
            self.fail_job(job, task, error).await;
        } else if let Err(e) = job.release(job.payload().retry_interval).await {
            tracing::error!(queue = job.queue(), error = %e, "failed to release job for retry");
        }
    }

    fn remove_in_flight(&self, payload_id: &str) {
        self.shared
            .in_flight
            .lock()
            .expect("in-flight set mutex poisoned")
            .remove(payload_id);
    }

    fn warn_if_long_running(&self, job: &dyn Job) {
        if job.popped_at().elapsed() >= self.shared.config.max_execute_duration {
            tracing::warn!(
                queue = job.queue(),
                payload_id = %job.payload().id,
                "execution running past the maximum execution duration"
            );
        }
    }

    /// Terminal failure: mark the job failed, delete it unless the marking
    /// step already did, log, and notify the task plus the queue-level
    /// failed-job handler. Notification errors are swallowed.
    async fn fail_job(&self, job: &dyn Job, task: &dyn Task, error: QueueError) {
        if let Err(e) = job.mark_failed().await {
            tracing::error!(queue = job.queue(), error = %e, "failed to mark job as failed");
        }

        if !job.is_deleted() {
            if let Err(e) = job.delete().await {
                tracing::error!(queue = job.queue(), error = %e, "failed to delete failed job");
            }
        }

        tracing::error!(
            queue = job.queue(),
            payload_id = %job.payload().id,
            error = %error,
            "job reached final failure"
        );

        task.failed(job.payload(), &error).await;

        if let Some(handler) = &self.shared.config.failed_job_handler {
            let _ = handler(job.payload(), &error);
        }
    }
}

/// Best-effort extraction of a panic payload message.
fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Queue as _;
    use crate::config::QueueConfig;
    use crate::job::Payload;
    use crate::memory::MemoryQueue;
    use crate::task::{TaskContext, TaskResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct SlowTask {
        executions: Arc<AtomicU32>,
        hold: Duration,
    }

    #[async_trait]
    impl Task for SlowTask {
        fn name(&self) -> &str {
            "sync"
        }

        fn max_tries(&self) -> u32 {
            3
        }

        fn retry_interval(&self) -> Duration {
            Duration::ZERO
        }

        async fn execute(&self, _ctx: &TaskContext, _body: &serde_json::Value) -> TaskResult {
            self.executions.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
            Ok(())
        }
    }

    fn shared_with_task(queue: MemoryQueue, task: Arc<dyn Task>) -> Arc<Shared> {
        let mut tasks = HashMap::new();
        tasks.insert(task.name().to_string(), task);
        Arc::new(Shared {
            queue: Arc::new(queue),
            config: QueueConfig::default(),
            tasks: StdMutex::new(tasks),
            in_flight: StdMutex::new(HashMap::new()),
            worker_busy: Vec::new(),
        })
    }

    fn worker(id: usize, shared: Arc<Shared>) -> Worker {
        let (_tx, rx) = mpsc::channel::<Box<dyn Job>>(1);
        Worker::new(id, shared, Arc::new(Mutex::new(rx)), Arc::new(Semaphore::new(1)))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_same_id_deliveries_run_once() {
        let queue = MemoryQueue::new();
        for _ in 0..4 {
            queue.push_payload(
                "sync",
                Payload::new("same-id", 3, Duration::ZERO, json!(null)),
                Duration::ZERO,
                0,
            );
        }

        let executions = Arc::new(AtomicU32::new(0));
        let shared = shared_with_task(
            queue.clone(),
            Arc::new(SlowTask {
                executions: executions.clone(),
                hold: Duration::from_millis(300),
            }),
        );

        let mut jobs = Vec::new();
        for _ in 0..4 {
            jobs.push(queue.pop("sync").await.unwrap().unwrap());
        }

        // Four deliveries of the same payload id hit the guard from four
        // concurrent workers; exactly one may claim it and execute.
        let mut handles = Vec::new();
        for (id, job) in jobs.into_iter().enumerate() {
            let worker = worker(id, shared.clone());
            handles.push(tokio::spawn(async move {
                worker.run_job(job.as_ref()).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(queue.deferred_history().len(), 3);
        assert_eq!(queue.deleted_count(), 1);
        assert!(shared.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_precheck_releases_guard_entry() {
        let queue = MemoryQueue::new();
        queue.push_payload(
            "sync",
            Payload::new("worn", 3, Duration::ZERO, json!(null)),
            Duration::ZERO,
            3,
        );

        let executions = Arc::new(AtomicU32::new(0));
        let shared = shared_with_task(
            queue.clone(),
            Arc::new(SlowTask {
                executions: executions.clone(),
                hold: Duration::ZERO,
            }),
        );
        let worker = worker(0, shared.clone());

        // Popped with attempts=4 > max_tries=3: fails before execution.
        let job = queue.pop("sync").await.unwrap().unwrap();
        worker.run_job(job.as_ref()).await;

        assert_eq!(executions.load(Ordering::SeqCst), 0);
        assert_eq!(queue.failed_payloads().len(), 1);
        assert!(shared.in_flight.lock().unwrap().is_empty());

        // A fresh delivery of the same id must not be treated as a duplicate.
        queue.push_payload(
            "sync",
            Payload::new("worn", 3, Duration::ZERO, json!(null)),
            Duration::ZERO,
            0,
        );
        let job = queue.pop("sync").await.unwrap().unwrap();
        worker.run_job(job.as_ref()).await;

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(queue.deferred_history().is_empty());
    }

    #[test]
    fn test_panic_message_str() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload), "boom");
    }

    #[test]
    fn test_panic_message_string() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom".to_string());
        assert_eq!(panic_message(payload), "boom");
    }

    #[test]
    fn test_panic_message_other() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload), "unknown panic");
    }
}
