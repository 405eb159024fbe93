//! Task submission.
//!
//! Builds `count` independent tasks named `job_0 .. job_{count-1}` and hands
//! them to an executor.
//!
//! The task kind follows the duration: a zero duration always yields a
//! no-op task, any other duration a sleep of exactly that length. A
//! requested zero-length sleep therefore silently becomes a no-op.

use crate::executor::ExecutorHandle;
use crate::task::{TaskHandle, TaskId, TaskKind, TaskRuntime, TaskSpec};
use std::time::Duration;
use tracing::debug;

/// Submits `count` tasks and returns their handles in submission order.
///
/// Never blocks on task execution. Submitting to a torn-down executor still
/// returns `count` handles, each resolving to a failure.
#[must_use]
pub fn submit(
    executor: &ExecutorHandle,
    runtime: TaskRuntime,
    duration: Duration,
    count: usize,
) -> Vec<TaskHandle> {
    let kind = TaskKind::from_duration(duration);
    debug!(
        "Submitting {count} {runtime} tasks ({kind:?}) to {} executor",
        executor.name()
    );

    (0..count)
        .map(|index| executor.submit(TaskSpec::new(TaskId::job(index), kind, runtime)))
        .collect()
}
