//! In-memory queue backend with delayed readiness.
//!
//! Backs the test suite and embedded single-process use. Jobs live in plain
//! vectors guarded by one mutex; a job is ready once its `ready_at` instant
//! has passed. The attempt counter increments on every pop, matching the
//! backend contract the execution core relies on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use uuid::Uuid;

use crate::backend::Queue;
use crate::error::Result;
use crate::job::{Job, Payload};

#[derive(Debug, Clone)]
struct StoredJob {
    payload: Payload,
    ready_at: Instant,
    attempts: u32,
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, Vec<StoredJob>>,
    failed: Vec<Payload>,
    deleted: u64,
    /// (payload id, delay) for every release call.
    released: Vec<(String, Duration)>,
    /// (payload id, delay) for every `later` call.
    deferred: Vec<(String, Duration)>,
}

/// In-memory [`Queue`] implementation.
///
/// Cloning shares the underlying state, so tests can keep a handle for
/// introspection while the manager owns another.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    state: Arc<Mutex<State>>,
    job_timeout: Duration,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            job_timeout: Duration::from_secs(300),
        }
    }

    /// Set the execution timeout handed to every popped job.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Enqueue a body for immediate processing, minting a fresh payload id.
    /// Returns the id.
    pub fn push(
        &self,
        queue: &str,
        body: serde_json::Value,
        max_tries: u32,
        retry_interval: Duration,
    ) -> String {
        let payload = Payload::new(Uuid::new_v4().to_string(), max_tries, retry_interval, body);
        let id = payload.id.clone();
        self.push_payload(queue, payload, Duration::ZERO, 0);
        id
    }

    /// Enqueue a pre-built payload with an explicit delay and prior attempt
    /// count.
    pub fn push_payload(&self, queue: &str, payload: Payload, delay: Duration, attempts: u32) {
        let mut state = self.state.lock().expect("memory queue mutex poisoned");
        state.queues.entry(queue.to_string()).or_default().push(StoredJob {
            payload,
            ready_at: Instant::now() + delay,
            attempts,
        });
    }

    /// Number of jobs currently stored for `queue`, ready or delayed.
    pub fn queue_len(&self, queue: &str) -> usize {
        let state = self.state.lock().expect("memory queue mutex poisoned");
        state.queues.get(queue).map_or(0, Vec::len)
    }

    /// Number of jobs deleted so far.
    pub fn deleted_count(&self) -> u64 {
        self.state.lock().expect("memory queue mutex poisoned").deleted
    }

    /// Payloads that were marked as failed.
    pub fn failed_payloads(&self) -> Vec<Payload> {
        self.state
            .lock()
            .expect("memory queue mutex poisoned")
            .failed
            .clone()
    }

    /// Every release, as (payload id, delay), in order.
    pub fn release_history(&self) -> Vec<(String, Duration)> {
        self.state
            .lock()
            .expect("memory queue mutex poisoned")
            .released
            .clone()
    }

    /// Every delayed re-enqueue, as (payload id, delay), in order.
    pub fn deferred_history(&self) -> Vec<(String, Duration)> {
        self.state
            .lock()
            .expect("memory queue mutex poisoned")
            .deferred
            .clone()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn pop(&self, queue: &str) -> Result<Option<Box<dyn Job>>> {
        let mut state = self.state.lock().expect("memory queue mutex poisoned");

        let Some(jobs) = state.queues.get_mut(queue) else {
            return Ok(None);
        };

        let now = Instant::now();
        let Some(pos) = jobs.iter().position(|job| job.ready_at <= now) else {
            return Ok(None);
        };

        let stored = jobs.remove(pos);
        Ok(Some(Box::new(MemoryJob {
            queue: queue.to_string(),
            payload: stored.payload,
            attempts: stored.attempts + 1,
            popped_at: Instant::now(),
            timeout: self.job_timeout,
            deleted: AtomicBool::new(false),
            state: self.state.clone(),
        })))
    }

    async fn later(
        &self,
        queue: &str,
        delay: Duration,
        payload: &Payload,
        attempts: u32,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("memory queue mutex poisoned");
        state.deferred.push((payload.id.clone(), delay));
        state.queues.entry(queue.to_string()).or_default().push(StoredJob {
            payload: payload.clone(),
            ready_at: Instant::now() + delay,
            attempts,
        });
        Ok(())
    }
}

/// A popped job bound to the in-memory state.
struct MemoryJob {
    queue: String,
    payload: Payload,
    attempts: u32,
    popped_at: Instant,
    timeout: Duration,
    deleted: AtomicBool,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Job for MemoryJob {
    fn queue(&self) -> &str {
        &self.queue
    }

    fn payload(&self) -> &Payload {
        &self.payload
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }

    fn popped_at(&self) -> Instant {
        self.popped_at
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn delete(&self) -> Result<()> {
        if !self.deleted.swap(true, Ordering::SeqCst) {
            self.state.lock().expect("memory queue mutex poisoned").deleted += 1;
        }
        Ok(())
    }

    fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    async fn release(&self, delay: Duration) -> Result<()> {
        let mut state = self.state.lock().expect("memory queue mutex poisoned");
        state.released.push((self.payload.id.clone(), delay));
        state.queues.entry(self.queue.clone()).or_default().push(StoredJob {
            payload: self.payload.clone(),
            ready_at: Instant::now() + delay,
            // attempts carry over; the next pop increments them
            attempts: self.attempts,
        });
        Ok(())
    }

    async fn mark_failed(&self) -> Result<()> {
        self.state
            .lock()
            .expect("memory queue mutex poisoned")
            .failed
            .push(self.payload.clone());
        Ok(())
    }
}
