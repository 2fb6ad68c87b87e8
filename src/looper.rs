//! Scheduling actor that fans jobs in from every registered queue.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::{mpsc, Semaphore};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::job::Job;
use crate::manager::Shared;

/// Minimum interval between polling passes when every queue comes up empty.
const BASE_POLL_INTERVAL: Duration = Duration::from_millis(450);

/// Ceiling for the accumulated idle jitter before it resets to the base.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The single scheduling actor.
///
/// Each pass polls every registered queue once, in a fresh random order so no
/// queue can be starved by always coming last, and hands popped jobs to the
/// worker pool. Dropping the handoff sender when the loop exits is what ends
/// the workers' consume loop.
pub(crate) struct Looper {
    shared: Arc<Shared>,
    handoff: mpsc::Sender<Box<dyn Job>>,
    idle_workers: Arc<Semaphore>,
    cancel: CancellationToken,
    jitter: Duration,
}

impl Looper {
    pub(crate) fn new(
        shared: Arc<Shared>,
        handoff: mpsc::Sender<Box<dyn Job>>,
        idle_workers: Arc<Semaphore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared,
            handoff,
            idle_workers,
            cancel,
            jitter: BASE_POLL_INTERVAL,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                // Returning drops the handoff sender and closes the channel,
                // which stops every worker once the last job is drained.
                tracing::info!("shutdown, queue looper exited");
                return;
            }

            self.pass().await;
        }
    }

    /// One polling pass over every registered queue.
    async fn pass(&mut self) {
        let mut dispatched = false;
        for name in self.poll_order() {
            // Rendezvous gate: take an idle worker before asking the backend
            // for work, so polling never outruns execution capacity.
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => return,
                permit = self.idle_workers.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            match self.shared.queue.pop(&name).await {
                Ok(Some(job)) => {
                    // The worker that picks this job up returns the permit
                    // once the job ends.
                    permit.forget();
                    if self.handoff.send(job).await.is_err() {
                        return;
                    }
                    dispatched = true;
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    tracing::error!(queue = %name, error = %e, "failed to pop job");
                    drop(permit);
                }
            }
        }

        if !dispatched {
            tracing::debug!("no job popped, sleeping for a while");
            let interval = self.next_jitter();
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = time::sleep(interval) => {}
            }
        }
    }

    /// Queue polling order for one pass: every registered name, freshly
    /// shuffled so no queue is pinned to the back of the pass.
    fn poll_order(&self) -> Vec<String> {
        let mut names = self.shared.queue_names();
        names.shuffle(&mut rand::rng());
        names
    }

    fn next_jitter(&mut self) -> Duration {
        self.jitter = advance_jitter(self.jitter);
        self.jitter
    }
}

/// Idle throttle: grow the interval by a random slice of the base each empty
/// pass, resetting to the base once it passes the ceiling. Spreads polling
/// load under sustained idleness while keeping wake-up latency under ~1s.
fn advance_jitter(current: Duration) -> Duration {
    let step_ms = BASE_POLL_INTERVAL.as_millis() as u64 / 3;
    let next = current + Duration::from_millis(rand::rng().random_range(0..step_ms));
    if next > MAX_POLL_INTERVAL {
        BASE_POLL_INTERVAL
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut jitter = BASE_POLL_INTERVAL;
        for _ in 0..1000 {
            jitter = advance_jitter(jitter);
            assert!(jitter >= BASE_POLL_INTERVAL);
            assert!(jitter <= MAX_POLL_INTERVAL);
        }
    }

    #[test]
    fn test_jitter_eventually_resets() {
        let mut jitter = BASE_POLL_INTERVAL;
        let mut saw_reset = false;
        for _ in 0..1000 {
            let next = advance_jitter(jitter);
            if next < jitter {
                saw_reset = true;
                assert_eq!(next, BASE_POLL_INTERVAL);
            }
            jitter = next;
        }
        assert!(saw_reset, "jitter never hit the ceiling in 1000 passes");
    }

    #[test]
    fn test_poll_order_rotates_every_queue_to_front() {
        use crate::config::QueueConfig;
        use crate::memory::MemoryQueue;
        use crate::task::{Task, TaskContext, TaskResult};
        use async_trait::async_trait;
        use std::collections::{HashMap, HashSet};
        use std::sync::Mutex;

        struct NamedTask(&'static str);

        #[async_trait]
        impl Task for NamedTask {
            fn name(&self) -> &str {
                self.0
            }

            fn max_tries(&self) -> u32 {
                1
            }

            fn retry_interval(&self) -> Duration {
                Duration::ZERO
            }

            async fn execute(
                &self,
                _ctx: &TaskContext,
                _body: &serde_json::Value,
            ) -> TaskResult {
                Ok(())
            }
        }

        let names = ["email", "report", "billing", "cleanup"];
        let mut tasks: HashMap<String, Arc<dyn Task>> = HashMap::new();
        for name in names {
            tasks.insert(name.to_string(), Arc::new(NamedTask(name)));
        }
        let shared = Arc::new(Shared {
            queue: Arc::new(MemoryQueue::new()),
            config: QueueConfig::default(),
            tasks: Mutex::new(tasks),
            in_flight: Mutex::new(HashMap::new()),
            worker_busy: Vec::new(),
        });

        let (handoff, _rx) = mpsc::channel(1);
        let looper = Looper::new(
            shared,
            handoff,
            Arc::new(Semaphore::new(1)),
            CancellationToken::new(),
        );

        // Fairness property: over many passes, every registered queue shows
        // up in the first polling slot.
        let mut seen_first = HashSet::new();
        for _ in 0..200 {
            let order = looper.poll_order();
            assert_eq!(order.len(), names.len());
            seen_first.insert(order[0].clone());
        }

        assert_eq!(seen_first.len(), names.len());
    }
}
