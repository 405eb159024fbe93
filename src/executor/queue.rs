//! Shared job queue feeding executor workers.

use crate::task::{Completion, TaskOutcome, TaskSpec};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A task paired with the completion that resolves its handle.
#[derive(Debug)]
pub struct Job {
    /// The task to run.
    pub task: TaskSpec,
    /// Resolves the task's handle.
    pub completion: Completion,
}

impl Job {
    /// Creates a job.
    #[must_use]
    pub const fn new(task: TaskSpec, completion: Completion) -> Self {
        Self { task, completion }
    }

    /// Resolves the job with `outcome`.
    pub fn complete(self, outcome: TaskOutcome) {
        if self.completion.send(outcome).is_err() {
            debug!("Handle for task {} dropped before completion", self.task.id());
        }
    }
}

/// Unbounded FIFO of jobs shared by all workers of one executor.
///
/// Workers take turns waiting on the receiver; each job is popped exactly
/// once.
#[derive(Debug)]
pub struct JobQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>,
}

impl JobQueue {
    /// Creates an open queue.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }

    /// Enqueues a job, or fails it immediately if the queue is closed.
    pub fn push(&self, job: Job) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let rejected = match sender {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };
        rejected.complete(TaskOutcome::failure("executor is shut down"));
    }

    /// Waits for the next job. Returns `None` once the queue is closed and
    /// empty.
    pub async fn pop(&self) -> Option<Job> {
        self.receiver.lock().await.recv().await
    }

    /// Stops accepting jobs. Jobs already queued can still be popped.
    pub fn close(&self) {
        if self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            debug!("Job queue closed");
        }
    }

    /// Closes the queue and fails every job still waiting in it.
    ///
    /// Returns the number of cancelled jobs.
    pub async fn cancel_pending(&self) -> usize {
        self.close();
        let mut receiver = self.receiver.lock().await;
        receiver.close();

        let mut cancelled = 0;
        while let Ok(job) = receiver.try_recv() {
            job.complete(TaskOutcome::failure("cancelled: executor shut down"));
            cancelled += 1;
        }
        if cancelled > 0 {
            info!("Cancelled {cancelled} queued tasks");
        }
        cancelled
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
