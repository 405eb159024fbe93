//! Task definitions, outcomes and handles.
//!
//! A [`TaskSpec`] is the unit of work handed to an executor. Every submitted
//! spec is paired with exactly one [`TaskHandle`], and every handle resolves
//! to exactly one [`TaskResult`] once collected.

use crate::error::BenchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::oneshot;

/// Identifier of a task, unique within one submission (`job_0`, `job_1`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Creates the id for the task at `index` in a submission.
    #[must_use]
    pub fn job(index: usize) -> Self {
        Self(format!("job_{index}"))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a task does once it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Signal completion immediately.
    NoOp,
    /// Block for the given duration, then signal completion.
    Sleep(Duration),
}

impl TaskKind {
    /// Picks the task kind for a per-task duration.
    ///
    /// A zero duration always yields [`TaskKind::NoOp`]. This override is
    /// silent: callers asking for zero-second sleeps get no-ops.
    #[must_use]
    pub const fn from_duration(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::NoOp
        } else {
            Self::Sleep(duration)
        }
    }

    /// Returns the artificial delay of this kind.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        match self {
            Self::NoOp => Duration::ZERO,
            Self::Sleep(duration) => *duration,
        }
    }
}

/// How a task is run by the worker that picks it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskRuntime {
    /// Inside the worker itself.
    #[default]
    #[serde(rename = "python", alias = "in_process")]
    InProcess,
    /// As a `/bin/sh -c` child process of the worker.
    #[serde(rename = "bash", alias = "shell")]
    Shell,
}

impl TaskRuntime {
    /// Name used in CLI flags and report tables.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::InProcess => "python",
            Self::Shell => "bash",
        }
    }
}

impl FromStr for TaskRuntime {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "python" | "in-process" | "inprocess" => Ok(Self::InProcess),
            "bash" | "shell" => Ok(Self::Shell),
            other => Err(BenchError::config(format!("Invalid task type: {other}"))),
        }
    }
}

impl fmt::Display for TaskRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A unit of work to be executed.
///
/// Decoding goes through [`TaskSpec::new`], so a zero-length sleep read off
/// the wire is a no-op too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTaskSpec")]
pub struct TaskSpec {
    id: TaskId,
    kind: TaskKind,
    runtime: TaskRuntime,
}

#[derive(Deserialize)]
struct RawTaskSpec {
    id: TaskId,
    kind: TaskKind,
    runtime: TaskRuntime,
}

impl From<RawTaskSpec> for TaskSpec {
    fn from(raw: RawTaskSpec) -> Self {
        Self::new(raw.id, raw.kind, raw.runtime)
    }
}

impl TaskSpec {
    /// Creates a task spec. A zero-length sleep is stored as a no-op.
    #[must_use]
    pub fn new(id: TaskId, kind: TaskKind, runtime: TaskRuntime) -> Self {
        Self {
            id,
            kind: TaskKind::from_duration(kind.duration()),
            runtime,
        }
    }

    /// Returns the task id.
    #[must_use]
    pub const fn id(&self) -> &TaskId {
        &self.id
    }

    /// Returns the task kind.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Returns the runtime the task is executed in.
    #[must_use]
    pub const fn runtime(&self) -> TaskRuntime {
        self.runtime
    }
}

/// Outcome of a single task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// The task completed and returned this value.
    Success(String),
    /// The task failed with this error message.
    Failure(String),
}

impl TaskOutcome {
    /// Builds a failure outcome from any error.
    pub fn failure(err: impl fmt::Display) -> Self {
        let message = err.to_string();
        if message.is_empty() {
            Self::Failure("task failed without an error message".to_string())
        } else {
            Self::Failure(message)
        }
    }

    /// Returns whether the task succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the error message of a failed task.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Failure(message) => Some(message),
        }
    }
}

/// Result of a collected task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    id: TaskId,
    outcome: TaskOutcome,
}

impl TaskResult {
    /// Creates a task result.
    #[must_use]
    pub const fn new(id: TaskId, outcome: TaskOutcome) -> Self {
        Self { id, outcome }
    }

    /// Returns the task id.
    #[must_use]
    pub const fn id(&self) -> &TaskId {
        &self.id
    }

    /// Returns the outcome.
    #[must_use]
    pub const fn outcome(&self) -> &TaskOutcome {
        &self.outcome
    }

    /// Returns whether the task succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Sending half of a [`TaskHandle`], held by whichever worker runs the task.
pub type Completion = oneshot::Sender<TaskOutcome>;

/// Future-like reference to the eventual outcome of one submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    receiver: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    /// Creates a pending handle and the completion used to resolve it.
    #[must_use]
    pub fn pending(id: TaskId) -> (Self, Completion) {
        let (sender, receiver) = oneshot::channel();
        (Self { id, receiver }, sender)
    }

    /// Creates a handle that is already resolved as a failure.
    #[must_use]
    pub fn failed(id: TaskId, message: impl fmt::Display) -> Self {
        let (handle, completion) = Self::pending(id);
        let _ = completion.send(TaskOutcome::failure(message));
        handle
    }

    /// Returns the id of the task behind this handle.
    #[must_use]
    pub const fn id(&self) -> &TaskId {
        &self.id
    }

    /// Waits for the task to resolve.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::TaskExecution`] if the task was dropped before
    /// it produced an outcome (worker crash, executor torn down).
    pub async fn wait(self) -> Result<TaskOutcome, BenchError> {
        let Self { id, receiver } = self;
        receiver.await.map_err(|_| BenchError::TaskExecution {
            task: id.to_string(),
            message: "task was dropped before completing".to_string(),
        })
    }
}
