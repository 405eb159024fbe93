//! Execution backends and the executor factory.
//!
//! This module defines the [`Executor`] trait implemented by every backend,
//! the [`ExecutorHandle`] threaded through submission and collection, and
//! the [`ExecutorFactory`] that keeps at most one executor alive at a time.

pub mod local;
pub mod process;
pub mod queue;
pub mod thread;

use crate::config::ExecutorConfig;
use crate::error::{BenchError, Result};
use crate::monitor::Monitor;
use crate::task::{TaskHandle, TaskOutcome, TaskSpec};
use local::LocalRunner;
use process::ProcessExecutor;
use queue::Job;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thread::ThreadExecutor;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Type alias for boxed async futures.
///
/// Used to enable dynamic dispatch for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Runs the work described by a [`TaskSpec`].
///
/// The thread executor calls its runner directly; worker processes use
/// [`LocalRunner`].
pub trait TaskRunner: Send + Sync {
    /// Runs one task to completion and returns its success value.
    ///
    /// # Errors
    ///
    /// Returns an error if the task's work fails.
    fn run(&self, task: TaskSpec) -> BoxFuture<'static, Result<String>>;
}

/// Trait for task-execution backends.
///
/// # Safety
///
/// Implementations must ensure that:
/// - Every submitted job's completion is either resolved or dropped
/// - Workers are released by [`Executor::shutdown`]
/// - Task failures are reported through the completion, not panicked
pub trait Executor: Send + Sync {
    /// Enqueues a job. Never blocks on task execution.
    fn submit(&self, job: Job);

    /// Returns the number of tasks that can run concurrently.
    fn capacity(&self) -> usize;

    /// Returns a human-readable name for this executor.
    fn name(&self) -> &'static str;

    /// Returns a probe counting this executor's live workers.
    fn probe(&self) -> ResourceProbe;

    /// Cancels outstanding jobs and releases all workers.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::ResourceTeardown`] if some worker could not be
    /// released cleanly.
    fn shutdown(&self) -> BoxFuture<'_, Result<()>>;
}

/// Counts live workers (worker loops or worker processes) of one executor.
#[derive(Debug, Clone, Default)]
pub struct ResourceProbe(Arc<AtomicUsize>);

impl ResourceProbe {
    /// Returns the number of workers currently alive.
    #[must_use]
    pub fn live(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Registers a live worker until the returned guard is dropped.
    #[must_use]
    pub fn enter(&self) -> WorkerGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        WorkerGuard(Arc::clone(&self.0))
    }
}

/// Keeps one worker registered with its [`ResourceProbe`].
#[derive(Debug)]
pub struct WorkerGuard(Arc<AtomicUsize>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct HandleInner {
    id: Uuid,
    config: ExecutorConfig,
    backend: Box<dyn Executor>,
    monitor: Option<Monitor>,
    relays: Mutex<JoinSet<()>>,
    torn_down: AtomicBool,
}

/// Handle to a built executor.
///
/// Cloning is cheap; all clones refer to the same backend.
#[derive(Clone)]
pub struct ExecutorHandle {
    inner: Arc<HandleInner>,
}

impl ExecutorHandle {
    /// Returns the unique id of this executor instance.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Returns the configuration this executor was built from.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Returns the number of tasks that can run concurrently.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.backend.capacity()
    }

    /// Returns the backend name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.backend.name()
    }

    /// Returns a probe counting the backend's live workers.
    #[must_use]
    pub fn probe(&self) -> ResourceProbe {
        self.inner.backend.probe()
    }

    /// Returns whether monitoring is running for this executor.
    #[must_use]
    pub fn is_monitored(&self) -> bool {
        self.inner.monitor.is_some()
    }

    /// Returns the monitor's `(submitted, completed, failed)` counts.
    #[must_use]
    pub fn monitor_counts(&self) -> Option<(u64, u64, u64)> {
        self.inner.monitor.as_ref().map(Monitor::counts)
    }

    /// Returns false once [`ExecutorHandle::teardown`] has been called.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.inner.torn_down.load(Ordering::SeqCst)
    }

    /// Submits one task and returns its handle.
    ///
    /// Submitting to a torn-down executor yields a handle that resolves to a
    /// failure.
    #[must_use]
    pub fn submit(&self, task: TaskSpec) -> TaskHandle {
        let id = task.id().clone();
        if !self.is_active() {
            return TaskHandle::failed(id, "executor is shut down");
        }

        let (handle, completion) = TaskHandle::pending(id.clone());
        let Some(monitor) = self.inner.monitor.clone() else {
            self.inner.backend.submit(Job::new(task, completion));
            return handle;
        };

        // Relay the outcome through the monitor before it reaches the caller.
        monitor.task_submitted(&id);
        let (inner_handle, inner_completion) = TaskHandle::pending(id.clone());
        self.inner.backend.submit(Job::new(task, inner_completion));
        let mut relays = self.inner.relays.lock().unwrap_or_else(PoisonError::into_inner);
        while relays.try_join_next().is_some() {}
        relays.spawn(async move {
            let outcome = inner_handle
                .wait()
                .await
                .unwrap_or_else(TaskOutcome::failure);
            monitor.task_finished(&id, &outcome);
            let _ = completion.send(outcome);
        });

        handle
    }

    /// Cancels outstanding tasks and releases the backend's workers.
    ///
    /// Calling this more than once is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::ResourceTeardown`] if the backend could not
    /// release every worker.
    pub async fn teardown(&self) -> Result<()> {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            debug!("Executor {} already torn down", self.inner.id);
            return Ok(());
        }

        info!(
            "Tearing down {} executor {}",
            self.inner.backend.name(),
            self.inner.id
        );
        let result = self.inner.backend.shutdown().await;
        if let Some(monitor) = &self.inner.monitor {
            // Shutdown resolved every backend job; let the relays record them.
            let mut relays =
                std::mem::take(&mut *self.inner.relays.lock().unwrap_or_else(PoisonError::into_inner));
            while relays.join_next().await.is_some() {}
            monitor.stop();
        }
        result
    }
}

impl std::fmt::Debug for ExecutorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorHandle")
            .field("id", &self.inner.id)
            .field("backend", &self.inner.backend.name())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Builds an executor that runs in-process tasks with [`LocalRunner`].
///
/// # Errors
///
/// Returns an error if worker processes cannot be launched.
pub async fn build(config: ExecutorConfig) -> Result<ExecutorHandle> {
    build_with_runner(config, Arc::new(LocalRunner::new())).await
}

/// Builds an executor with a custom runner for the thread backend.
///
/// Process backends always run [`LocalRunner`] inside their workers.
///
/// # Errors
///
/// Returns an error if worker processes cannot be launched.
pub async fn build_with_runner(
    config: ExecutorConfig,
    runner: Arc<dyn TaskRunner>,
) -> Result<ExecutorHandle> {
    let id = Uuid::new_v4();
    info!(
        "Building {} executor {id}: {} workers x {} nodes",
        config.kind(),
        config.worker_count(),
        config.node_count()
    );

    let backend: Box<dyn Executor> = if config.kind().uses_processes() {
        Box::new(ProcessExecutor::start(&config)?)
    } else {
        Box::new(ThreadExecutor::start(config.total_slots(), runner))
    };

    let monitor = if config.monitoring_enabled() {
        match Monitor::start(config.monitor_address(), id, config.kind()).await {
            Ok(monitor) => Some(monitor),
            Err(e) => {
                warn!("Monitoring unavailable for executor {id}, continuing without it: {e}");
                None
            }
        }
    } else {
        None
    };

    Ok(ExecutorHandle {
        inner: Arc::new(HandleInner {
            id,
            config,
            backend,
            monitor,
            relays: Mutex::new(JoinSet::new()),
            torn_down: AtomicBool::new(false),
        }),
    })
}

/// Builds executors one at a time.
///
/// Building a new executor first tears down the one built before it, so
/// repeated runs never leak workers.
pub struct ExecutorFactory {
    runner: Arc<dyn TaskRunner>,
    active: Option<ExecutorHandle>,
}

impl ExecutorFactory {
    /// Creates a factory whose thread executors use [`LocalRunner`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_runner(Arc::new(LocalRunner::new()))
    }

    /// Creates a factory whose thread executors use `runner`.
    #[must_use]
    pub fn with_runner(runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            runner,
            active: None,
        }
    }

    /// Returns the executor built last, if it has not been torn down.
    #[must_use]
    pub fn active(&self) -> Option<&ExecutorHandle> {
        self.active.as_ref().filter(|handle| handle.is_active())
    }

    /// Tears down the active executor, then builds a new one.
    ///
    /// A failed teardown is logged and does not prevent the build.
    ///
    /// # Errors
    ///
    /// Returns an error if the new executor cannot be built.
    pub async fn build(&mut self, config: ExecutorConfig) -> Result<ExecutorHandle> {
        if let Err(e) = self.teardown().await {
            warn!("Previous executor was not released cleanly: {e}");
        }

        let handle = build_with_runner(config, Arc::clone(&self.runner)).await?;
        self.active = Some(handle.clone());
        Ok(handle)
    }

    /// Tears down the active executor, if any.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::ResourceTeardown`] if its workers could not be
    /// released.
    pub async fn teardown(&mut self) -> Result<()> {
        match self.active.take() {
            Some(previous) => previous.teardown().await,
            None => Ok(()),
        }
    }
}

impl Default for ExecutorFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks that a probe reached zero after teardown.
pub(crate) fn ensure_released(probe: &ResourceProbe, backend: &str) -> Result<()> {
    match probe.live() {
        0 => Ok(()),
        live => Err(BenchError::ResourceTeardown {
            reason: format!("{live} {backend} workers still alive"),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ExecutorKind;
    use crate::task::{TaskId, TaskKind, TaskRuntime};
    use std::time::Duration;

    // Test that Executor trait is object-safe (can be used with dyn)
    #[allow(dead_code)]
    fn _assert_object_safe(_executor: &dyn Executor) {}

    fn thread_config(workers: usize) -> ExecutorConfig {
        ExecutorConfig::builder()
            .kind(ExecutorKind::Thread)
            .worker_count(workers)
            .build()
            .unwrap()
    }

    fn noop(index: usize) -> TaskSpec {
        TaskSpec::new(TaskId::job(index), TaskKind::NoOp, TaskRuntime::InProcess)
    }

    #[test]
    fn test_probe_counts_guards() {
        let probe = ResourceProbe::default();
        let first = probe.enter();
        let second = probe.enter();
        assert_eq!(probe.live(), 2);
        drop(first);
        assert_eq!(probe.live(), 1);
        drop(second);
        assert_eq!(probe.live(), 0);
        assert!(ensure_released(&probe, "test").is_ok());
    }

    #[tokio::test]
    async fn test_build_thread_executor() {
        let handle = build(thread_config(3)).await.unwrap();
        assert_eq!(handle.capacity(), 3);
        assert_eq!(handle.config().kind(), ExecutorKind::Thread);
        assert_eq!(handle.config().worker_count(), 3);
        assert_eq!(handle.name(), "thread");
        assert_eq!(handle.probe().live(), 3);
        assert!(!handle.is_monitored());

        handle.teardown().await.unwrap();
        assert!(!handle.is_active());
        assert_eq!(handle.probe().live(), 0);
    }

    #[tokio::test]
    async fn test_submit_after_teardown_fails_in_band() {
        let handle = build(thread_config(1)).await.unwrap();
        handle.teardown().await.unwrap();

        let outcome = handle.submit(noop(0)).wait().await.unwrap();
        assert_eq!(outcome.error(), Some("executor is shut down"));
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let handle = build(thread_config(2)).await.unwrap();
        handle.teardown().await.unwrap();
        handle.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_factory_tears_down_previous() {
        let mut factory = ExecutorFactory::new();

        let first = factory.build(thread_config(4)).await.unwrap();
        let first_probe = first.probe();
        assert_eq!(first_probe.live(), 4);

        let second = factory.build(thread_config(2)).await.unwrap();
        assert!(!first.is_active());
        assert_eq!(first_probe.live(), 0);
        assert_eq!(second.probe().live(), 2);
        assert_eq!(factory.active().map(ExecutorHandle::id), Some(second.id()));

        factory.teardown().await.unwrap();
        assert!(factory.active().is_none());
        assert_eq!(second.probe().live(), 0);
    }

    #[tokio::test]
    async fn test_teardown_counts_cancelled_tasks_before_stopping_monitor() {
        let hub = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = ExecutorConfig::builder()
            .kind(ExecutorKind::Thread)
            .worker_count(1)
            .monitoring(true)
            .monitor_address(hub.local_addr().unwrap().to_string())
            .build()
            .unwrap();
        let handle = build(config).await.unwrap();
        assert!(handle.is_monitored());

        let handles: Vec<_> = (0..3)
            .map(|i| {
                handle.submit(TaskSpec::new(
                    TaskId::job(i),
                    TaskKind::Sleep(Duration::from_secs(30)),
                    TaskRuntime::InProcess,
                ))
            })
            .collect();

        handle.teardown().await.unwrap();
        assert_eq!(handle.monitor_counts(), Some((3, 0, 3)));

        for task in handles {
            assert!(!task.wait().await.unwrap().is_success());
        }
    }

    #[tokio::test]
    async fn test_process_kinds_need_worker_program() {
        let config = ExecutorConfig::builder()
            .kind(ExecutorKind::WorkQueue)
            .worker_program("/nonexistent/taskbench")
            .build()
            .unwrap();
        assert!(config.kind().uses_processes());
        assert!(build(config).await.is_err());
        assert!(!ExecutorKind::Thread.uses_processes());
    }
}
