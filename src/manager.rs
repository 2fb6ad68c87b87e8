//! Queue manager: task registry, worker pool lifecycle, graceful shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::backend::{DynQueue, Queue};
use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::looper::Looper;
use crate::task::Task;
use crate::worker::Worker;

/// Upper bound for the quiescence poll interval during graceful shutdown.
const SHUTDOWN_POLL_INTERVAL_MAX: Duration = Duration::from_millis(500);

/// State shared between the manager, the looper, and every worker.
pub(crate) struct Shared {
    pub(crate) queue: DynQueue,
    pub(crate) config: QueueConfig,
    /// Queue name -> task descriptor. Mutated only during bootstrap.
    pub(crate) tasks: Mutex<HashMap<String, Arc<dyn Task>>>,
    /// Payload id -> worker id for every job mid-execution.
    pub(crate) in_flight: Mutex<HashMap<String, usize>>,
    /// Per-worker busy flag, index = worker id. Read by the shutdown waiter.
    pub(crate) worker_busy: Vec<AtomicBool>,
}

impl Shared {
    pub(crate) fn set_worker_busy(&self, worker_id: usize, busy: bool) {
        if let Some(flag) = self.worker_busy.get(worker_id) {
            flag.store(busy, Ordering::SeqCst);
        }
    }

    pub(crate) fn workers_idle(&self) -> bool {
        self.worker_busy
            .iter()
            .all(|flag| !flag.load(Ordering::SeqCst))
    }

    pub(crate) fn queue_names(&self) -> Vec<String> {
        self.tasks
            .lock()
            .expect("task registry mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub(crate) fn task(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.tasks
            .lock()
            .expect("task registry mutex poisoned")
            .get(name)
            .cloned()
    }
}

/// Execution core of the job queue: composes the looper, the worker pool,
/// the task registry, and the shutdown protocol.
///
/// Usage is bootstrap-then-start: register every task, call
/// [`Manager::start`], and eventually [`Manager::shutdown`]. Registering
/// tasks after scheduling has begun is not synchronized.
pub struct Manager {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    in_shutdown: AtomicBool,
}

impl Manager {
    /// Create a new manager over the given backend.
    pub fn new(queue: impl Queue + 'static, config: QueueConfig) -> Self {
        let worker_busy = (0..config.concurrency).map(|_| AtomicBool::new(false)).collect();
        Self {
            shared: Arc::new(Shared {
                queue: Arc::new(queue),
                config,
                tasks: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                worker_busy,
            }),
            cancel: CancellationToken::new(),
            in_shutdown: AtomicBool::new(false),
        }
    }

    /// Register a single task, overwriting any task with the same name.
    pub fn bootstrap_one(&self, task: Arc<dyn Task>) -> Result<()> {
        let mut tasks = self.shared.tasks.lock().expect("task registry mutex poisoned");

        tracing::debug!(
            name = task.name(),
            max_tries = task.max_tries(),
            retry_interval_ms = task.retry_interval().as_millis() as u64,
            "task registered"
        );

        tasks.insert(task.name().to_string(), task);
        Ok(())
    }

    /// Register tasks in order, aborting on the first error.
    pub fn bootstrap(&self, tasks: Vec<Arc<dyn Task>>) -> Result<()> {
        for task in tasks {
            self.bootstrap_one(task)?;
        }
        Ok(())
    }

    /// Spawn the looper and the worker pool.
    ///
    /// Fails with [`QueueError::Closed`] once a shutdown has started. Calling
    /// it again on a healthy queue spawns another looper and worker set over
    /// the same shared state; nothing guards against that.
    pub fn start(&self) -> Result<()> {
        if self.shutting_down() {
            return Err(QueueError::Closed);
        }

        // Rendezvous handoff: the looper takes an idle-worker permit before
        // each pop and forgets it on dispatch; the receiving worker returns
        // the permit when its job ends. Capacity one only carries the job
        // across; the permit gate keeps polling coupled to real capacity.
        let (handoff_tx, handoff_rx) = mpsc::channel(1);
        let handoff_rx = Arc::new(tokio::sync::Mutex::new(handoff_rx));
        let idle_workers = Arc::new(Semaphore::new(self.shared.config.concurrency));

        let looper = Looper::new(
            self.shared.clone(),
            handoff_tx,
            idle_workers.clone(),
            self.cancel.clone(),
        );
        tokio::spawn(looper.run());

        for worker_id in 0..self.shared.config.concurrency {
            let worker = Worker::new(
                worker_id,
                self.shared.clone(),
                handoff_rx.clone(),
                idle_workers.clone(),
            );
            tokio::spawn(worker.run());
        }

        tracing::info!(
            concurrency = self.shared.config.concurrency,
            "queue started"
        );

        Ok(())
    }

    /// Gracefully stop the queue.
    ///
    /// Phase one cancels the shutdown token: the looper stops popping and
    /// drops the handoff channel, which drains and stops every worker after
    /// its current job. Phase two polls for quiescence with an exponentially
    /// growing interval until every worker is idle or `timeout` elapses.
    ///
    /// Jobs still mid-execution when the deadline fires are abandoned here;
    /// backend-side redelivery governs their recovery.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.in_shutdown.store(true, Ordering::SeqCst);
        self.cancel.cancel();

        tracing::info!("graceful shutdown started, waiting for workers to drain");

        let deadline = Instant::now() + timeout;
        let mut poll_interval = Duration::from_millis(1);

        loop {
            if self.shared.workers_idle() {
                tracing::info!("all workers idle, shutdown complete");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!("shutdown deadline exceeded with jobs still in flight");
                return Err(QueueError::ShutdownDeadlineExceeded);
            }

            let interval = next_poll_interval(&mut poll_interval);
            time::sleep_until(now + interval.min(deadline - now)).await;
        }
    }

    /// Whether a shutdown has started or completed.
    pub fn shutting_down(&self) -> bool {
        self.in_shutdown.load(Ordering::SeqCst)
    }
}

/// Next quiescence poll interval: current base plus ~10% jitter, with the
/// base doubling each round up to [`SHUTDOWN_POLL_INTERVAL_MAX`].
fn next_poll_interval(base: &mut Duration) -> Duration {
    let jitter_ns = (base.as_nanos() as u64 / 10).max(1);
    let interval = *base + Duration::from_nanos(rand::rng().random_range(0..jitter_ns));
    *base = (*base * 2).min(SHUTDOWN_POLL_INTERVAL_MAX);
    interval
}
