//! Local task runner.
//!
//! Runs a [`TaskSpec`] either inside the current process or as a
//! `/bin/sh -c` child process with captured stdout/stderr.

use crate::error::{BenchError, Result};
use crate::executor::{BoxFuture, TaskRunner};
use crate::task::{TaskId, TaskKind, TaskOutcome, TaskRuntime, TaskSpec};
use std::any::Any;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Shell used for [`TaskRuntime::Shell`] tasks.
const SHELL: &str = "/bin/sh";

/// Runner for no-op and sleep tasks on the local machine.
///
/// # Example
///
/// ```
/// use taskbench::executor::local::LocalRunner;
/// use taskbench::executor::TaskRunner;
/// use taskbench::task::{TaskId, TaskKind, TaskRuntime, TaskSpec};
///
/// # tokio_test::block_on(async {
/// let runner = LocalRunner::new();
/// let task = TaskSpec::new(TaskId::job(0), TaskKind::NoOp, TaskRuntime::InProcess);
/// assert_eq!(runner.run(task).await.unwrap(), "Finished job job_0");
/// # });
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

impl LocalRunner {
    /// Creates a local runner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn run_in_process(task: TaskSpec) -> Result<String> {
        if let TaskKind::Sleep(duration) = task.kind() {
            debug!(
                "Running job {} for {:.1} seconds",
                task.id(),
                duration.as_secs_f64()
            );
            tokio::time::sleep(duration).await;
        }
        Ok(format!("Finished job {}", task.id()))
    }

    async fn run_in_shell(task: TaskSpec) -> Result<String> {
        let task_id = task.id().clone();
        let script = match task.kind() {
            TaskKind::NoOp => format!("echo Finished job {task_id}"),
            TaskKind::Sleep(duration) => format!(
                "sleep {}; echo Finished job {task_id}",
                duration.as_secs_f64()
            ),
        };
        run_script(SHELL, &task_id, &script).await
    }
}

/// Runs `script` with `shell -c` and returns its trimmed stdout.
///
/// The shell leads its own process group. Dropping the returned future
/// kills the whole group, so commands the shell forked die with it.
///
/// # Errors
///
/// Returns [`BenchError::TaskExecution`] if the shell cannot be spawned or
/// exits non-zero; the message names the exit code and carries stderr.
pub async fn run_script(shell: &str, task_id: &TaskId, script: &str) -> Result<String> {
    let start = Instant::now();
    let mut command = Command::new(shell);
    command
        .arg("-c")
        .arg(script)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null()) // No stdin to prevent hanging
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let child = command.spawn().map_err(|e| {
        error!("Failed to spawn shell for task {task_id}: {e}");
        BenchError::TaskExecution {
            task: task_id.to_string(),
            message: format!("failed to spawn {shell}: {e}"),
        }
    })?;

    #[cfg(unix)]
    let mut group = group::ProcessGroup::new(child.id());

    let output = child.wait_with_output().await.map_err(|e| BenchError::TaskExecution {
        task: task_id.to_string(),
        message: format!("failed to wait for {shell}: {e}"),
    })?;

    #[cfg(unix)]
    group.release();

    let exit_code = output.status.code().unwrap_or(-1);
    debug!(
        "Task {task_id} exited with code {exit_code} in {:?}",
        start.elapsed()
    );

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(BenchError::TaskExecution {
            task: task_id.to_string(),
            message: format!("exit code {exit_code}: {}", stderr.trim()),
        })
    }
}

#[cfg(unix)]
mod group {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    use tracing::debug;

    /// Kills a process group when dropped, unless released first.
    pub(super) struct ProcessGroup(Option<Pid>);

    impl ProcessGroup {
        pub(super) fn new(leader: Option<u32>) -> Self {
            Self(leader.and_then(|pid| i32::try_from(pid).ok()).map(Pid::from_raw))
        }

        /// The shell exited on its own; leave the group alone.
        pub(super) fn release(&mut self) {
            self.0 = None;
        }
    }

    impl Drop for ProcessGroup {
        fn drop(&mut self) {
            let Some(pgid) = self.0.take() else {
                return;
            };
            match killpg(pgid, Signal::SIGKILL) {
                Ok(()) => debug!("Killed process group {pgid}"),
                Err(Errno::ESRCH) => {}
                Err(e) => debug!("Could not kill process group {pgid}: {e}"),
            }
        }
    }
}

impl TaskRunner for LocalRunner {
    fn run(&self, task: TaskSpec) -> BoxFuture<'static, Result<String>> {
        Box::pin(async move {
            match task.runtime() {
                TaskRuntime::InProcess => Self::run_in_process(task).await,
                TaskRuntime::Shell => Self::run_in_shell(task).await,
            }
        })
    }
}

/// Runs one task on `runner`, turning errors and panics into a failure
/// outcome.
///
/// Dropping the returned future cancels the task.
pub async fn run_isolated(runner: &Arc<dyn TaskRunner>, task: TaskSpec) -> TaskOutcome {
    let task_id = task.id().clone();
    let mut attempt = JoinSet::new();
    attempt.spawn(runner.run(task));

    match attempt.join_next().await {
        Some(Ok(Ok(value))) => TaskOutcome::Success(value),
        Some(Ok(Err(e))) => {
            debug!("Task {task_id} failed: {e}");
            TaskOutcome::failure(e)
        }
        Some(Err(e)) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            error!("Task {task_id} panicked: {message}");
            TaskOutcome::failure(format!("task panicked: {message}"))
        }
        Some(Err(e)) => TaskOutcome::failure(format!("task aborted: {e}")),
        None => TaskOutcome::failure("task was never started"),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct PanickingRunner;

    impl TaskRunner for PanickingRunner {
        fn run(&self, task: TaskSpec) -> BoxFuture<'static, Result<String>> {
            Box::pin(async move {
                if task.id().as_str() == "job_7" {
                    panic!("worker blew up");
                }
                Ok(String::new())
            })
        }
    }

    fn spec(kind: TaskKind, runtime: TaskRuntime) -> TaskSpec {
        TaskSpec::new(TaskId::job(7), kind, runtime)
    }

    #[tokio::test]
    async fn test_in_process_noop() {
        let value = LocalRunner::new()
            .run(spec(TaskKind::NoOp, TaskRuntime::InProcess))
            .await
            .unwrap();
        assert_eq!(value, "Finished job job_7");
    }

    #[tokio::test]
    async fn test_in_process_sleep_waits() {
        let start = Instant::now();
        LocalRunner::new()
            .run(spec(
                TaskKind::Sleep(Duration::from_millis(100)),
                TaskRuntime::InProcess,
            ))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_noop_captures_stdout() {
        let value = LocalRunner::new()
            .run(spec(TaskKind::NoOp, TaskRuntime::Shell))
            .await
            .unwrap();
        assert_eq!(value, "Finished job job_7");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_sleep_waits() {
        let start = Instant::now();
        let value = LocalRunner::new()
            .run(spec(
                TaskKind::Sleep(Duration::from_millis(200)),
                TaskRuntime::Shell,
            ))
            .await
            .unwrap();
        assert_eq!(value, "Finished job job_7");
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_failure_names_exit_code_and_stderr() {
        let err = run_script(SHELL, &TaskId::job(1), "echo no such input >&2; exit 3")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Task job_1 failed: exit code 3: no such input"
        );
    }

    #[tokio::test]
    async fn test_script_spawn_failure_names_shell() {
        let err = run_script("/nonexistent/shell", &TaskId::job(2), "true")
            .await
            .unwrap_err();
        let BenchError::TaskExecution { task, message } = err else {
            panic!("expected a task error");
        };
        assert_eq!(task, "job_2");
        assert!(message.starts_with("failed to spawn /nonexistent/shell"));
    }

    /// Counts live processes whose command line is exactly `args`.
    #[cfg(target_os = "linux")]
    fn count_processes(args: &[&str]) -> usize {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return 0;
        };
        entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| std::fs::read(entry.path().join("cmdline")).ok())
            .filter(|cmdline| {
                let parts: Vec<_> = cmdline
                    .split(|b| *b == 0)
                    .filter(|part| !part.is_empty())
                    .map(String::from_utf8_lossy)
                    .collect();
                parts.len() == args.len()
                    && parts[0].ends_with(args[0])
                    && parts[1..].iter().zip(&args[1..]).all(|(a, b)| a == b)
            })
            .count()
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancelled_script_kills_forked_commands() {
        let sleep = ["sleep", "41.377"];
        let running = tokio::spawn(async {
            run_script(SHELL, &TaskId::job(0), "sleep 41.377; echo done").await
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while count_processes(&sleep) == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(count_processes(&sleep), 1);

        running.abort();
        assert!(running.await.unwrap_err().is_cancelled());

        let deadline = Instant::now() + Duration::from_secs(5);
        while count_processes(&sleep) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(count_processes(&sleep), 0);
    }

    #[tokio::test]
    async fn test_run_isolated_contains_panic() {
        let runner: Arc<dyn TaskRunner> = Arc::new(PanickingRunner);
        let outcome = run_isolated(&runner, spec(TaskKind::NoOp, TaskRuntime::InProcess)).await;
        assert_eq!(outcome.error(), Some("task panicked: worker blew up"));
    }

    #[tokio::test]
    async fn test_run_isolated_success() {
        let runner: Arc<dyn TaskRunner> = Arc::new(LocalRunner::new());
        let outcome = run_isolated(&runner, spec(TaskKind::NoOp, TaskRuntime::InProcess)).await;
        assert!(outcome.is_success());
    }
}
