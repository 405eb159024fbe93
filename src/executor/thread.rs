//! In-process worker pool.
//!
//! A fixed number of worker loops pull jobs from one shared queue and run
//! them on the configured [`TaskRunner`].

use crate::error::Result;
use crate::executor::local::run_isolated;
use crate::executor::queue::{Job, JobQueue};
use crate::executor::{ensure_released, BoxFuture, Executor, ResourceProbe, TaskRunner};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Executor running tasks on in-process worker loops.
pub struct ThreadExecutor {
    queue: Arc<JobQueue>,
    workers: Mutex<JoinSet<()>>,
    num_workers: usize,
    probe: ResourceProbe,
}

impl ThreadExecutor {
    /// Starts `num_workers` worker loops.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(num_workers: usize, runner: Arc<dyn TaskRunner>) -> Self {
        let queue = Arc::new(JobQueue::new());
        let probe = ResourceProbe::default();

        info!("Initializing thread executor with {num_workers} workers");

        let mut workers = JoinSet::new();
        for worker_id in 0..num_workers {
            let queue = Arc::clone(&queue);
            let runner = Arc::clone(&runner);
            let guard = probe.enter();

            workers.spawn(async move {
                let _guard = guard;
                debug!("Worker {worker_id} started");
                while let Some(job) = queue.pop().await {
                    let outcome = run_isolated(&runner, job.task.clone()).await;
                    job.complete(outcome);
                }
                debug!("Worker {worker_id} stopped: queue closed");
            });
        }

        Self {
            queue,
            workers: Mutex::new(workers),
            num_workers,
            probe,
        }
    }
}

impl Executor for ThreadExecutor {
    fn submit(&self, job: Job) {
        self.queue.push(job);
    }

    fn capacity(&self) -> usize {
        self.num_workers
    }

    fn name(&self) -> &'static str {
        "thread"
    }

    fn probe(&self) -> ResourceProbe {
        self.probe.clone()
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.queue.close();
            // Aborting a worker drops its running task and the task's
            // completion, which resolves the handle as a failure.
            self.workers.lock().await.shutdown().await;
            self.queue.cancel_pending().await;
            ensure_released(&self.probe, self.name())
        })
    }
}
