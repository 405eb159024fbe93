//! Best-effort task telemetry.
//!
//! A [`Monitor`] sends one JSON datagram per task event to a hub address
//! over UDP and keeps running counters. Nothing here can fail a task: send
//! errors are logged at `debug` and dropped.

use crate::config::ExecutorKind;
use crate::error::Result;
use crate::task::{TaskId, TaskOutcome};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tracing::{debug, info};
use uuid::Uuid;

/// Kind of task event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Task handed to the executor.
    Submitted,
    /// Task finished with a success value.
    Completed,
    /// Task finished with a failure.
    Failed,
}

/// One telemetry datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Executor that ran the task.
    pub executor: Uuid,
    /// Executor kind label.
    pub executor_kind: String,
    /// Event kind.
    pub event: EventKind,
    /// Task id.
    pub task: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Telemetry sender attached to one executor.
#[derive(Debug, Clone)]
pub struct Monitor {
    executor: Uuid,
    kind: ExecutorKind,
    socket: Arc<UdpSocket>,
    counters: Arc<Counters>,
    stopped: Arc<AtomicBool>,
}

impl Monitor {
    /// Binds a local UDP socket and targets it at `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound or the address does
    /// not resolve.
    pub async fn start(address: &str, executor: Uuid, kind: ExecutorKind) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(address).await?;
        info!("Monitoring executor {executor} to {address}");

        Ok(Self {
            executor,
            kind,
            socket: Arc::new(socket),
            counters: Arc::new(Counters::default()),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    fn emit(&self, event: EventKind, task: &TaskId) {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();

        let event = TaskEvent {
            executor: self.executor,
            executor_kind: self.kind.label().to_string(),
            event,
            task: task.to_string(),
            timestamp_ms,
        };
        let datagram = match serde_json::to_vec(&event) {
            Ok(datagram) => datagram,
            Err(e) => {
                debug!("Could not encode monitor event: {e}");
                return;
            }
        };
        if let Err(e) = self.socket.try_send(&datagram) {
            debug!("Dropped monitor event for {task}: {e}");
        }
    }

    /// Records a submission. Ignored once stopped.
    pub fn task_submitted(&self, task: &TaskId) {
        if self.stopped.load(Ordering::Relaxed) {
            return;
        }
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.emit(EventKind::Submitted, task);
    }

    /// Records a finished task.
    pub fn task_finished(&self, task: &TaskId, outcome: &TaskOutcome) {
        if self.stopped.load(Ordering::Relaxed) {
            return;
        }
        let event = if outcome.is_success() {
            self.counters.completed.fetch_add(1, Ordering::Relaxed);
            EventKind::Completed
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            EventKind::Failed
        };
        self.emit(event, task);
    }

    /// Returns `(submitted, completed, failed)` counts so far.
    #[must_use]
    pub fn counts(&self) -> (u64, u64, u64) {
        (
            self.counters.submitted.load(Ordering::Relaxed),
            self.counters.completed.load(Ordering::Relaxed),
            self.counters.failed.load(Ordering::Relaxed),
        )
    }

    /// Stops sending and logs a summary. Later calls do nothing.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::Relaxed) {
            return;
        }

        let (submitted, completed, failed) = self.counts();
        info!(
            "Monitor summary for executor {}: {submitted} submitted, {completed} completed, {failed} failed",
            self.executor
        );
    }
}
