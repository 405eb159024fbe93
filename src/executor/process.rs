//! Local multi-process pool.
//!
//! Each node is a worker process (`taskbench worker --slots N`) connected
//! over its stdin/stdout. Two dispatch strategies share the same nodes:
//!
//! - [`ExecutorKind::HighThroughput`]: one dispatcher pushes tasks to nodes
//!   round-robin; a task waits on its node for a free slot.
//! - [`ExecutorKind::WorkQueue`]: every slot of every node pulls the next
//!   task from the shared queue once it is free.

use crate::config::{ExecutorConfig, ExecutorKind};
use crate::error::{BenchError, Result};
use crate::executor::queue::{Job, JobQueue};
use crate::executor::{ensure_released, BoxFuture, Executor, ResourceProbe, WorkerGuard};
use crate::protocol::{read_frame, write_frame, WorkerMessage};
use crate::task::{Completion, TaskOutcome, TaskSpec};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Time a worker process gets to exit after `Shutdown` before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type FrameWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Tasks in flight on one node, keyed by sequence number.
///
/// `None` once the node's output has closed: no completion can arrive.
type InFlight = Arc<Mutex<Option<HashMap<u64, Completion>>>>;

/// Connection to one worker process.
pub struct Node {
    index: usize,
    writer: Mutex<FrameWriter>,
    in_flight: InFlight,
    next_seq: AtomicU64,
    slots: Arc<Semaphore>,
    reader: Mutex<Option<JoinHandle<()>>>,
    child: Mutex<Option<Child>>,
    guard: std::sync::Mutex<Option<WorkerGuard>>,
}

impl Node {
    /// Launches `program worker --slots <slots>` and connects to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    pub fn spawn(index: usize, program: &Path, slots: usize, probe: &ResourceProbe) -> Result<Self> {
        let mut child = Command::new(program)
            .arg("worker")
            .arg("--slots")
            .arg(slots.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!("Failed to launch worker {index} ({}): {e}", program.display());
                BenchError::Io(e)
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(BenchError::Protocol(format!(
                "worker {index} started without piped stdio"
            )));
        };

        info!(
            "Worker process {index} started (pid {})",
            child.id().unwrap_or_default()
        );
        let mut node = Self::connect(index, stdout, stdin, slots, Some(probe.enter()));
        *node.child.get_mut() = Some(child);
        Ok(node)
    }

    /// Connects to a worker over an arbitrary reader/writer pair.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect<R, W>(
        index: usize,
        reader: R,
        writer: W,
        slots: usize,
        guard: Option<WorkerGuard>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let in_flight: InFlight = Arc::new(Mutex::new(Some(HashMap::new())));
        let reader = tokio::spawn(Self::read_loop(index, reader, Arc::clone(&in_flight)));

        Self {
            index,
            writer: Mutex::new(Box::new(writer)),
            in_flight,
            next_seq: AtomicU64::new(0),
            slots: Arc::new(Semaphore::new(slots)),
            reader: Mutex::new(Some(reader)),
            child: Mutex::new(None),
            guard: std::sync::Mutex::new(guard),
        }
    }

    /// Routes result frames to waiting tasks until the worker's output
    /// closes, then fails whatever is still in flight.
    async fn read_loop<R>(index: usize, mut reader: R, in_flight: InFlight)
    where
        R: AsyncRead + Unpin,
    {
        loop {
            match read_frame::<_, WorkerMessage>(&mut reader).await {
                Ok(Some(WorkerMessage::Completed { seq, outcome })) => {
                    let completion = in_flight
                        .lock()
                        .await
                        .as_mut()
                        .and_then(|tasks| tasks.remove(&seq));
                    match completion {
                        Some(completion) => {
                            let _ = completion.send(outcome);
                        }
                        None => warn!("Worker {index} returned unknown seq {seq}"),
                    }
                }
                Ok(Some(other)) => warn!("Unexpected message from worker {index}: {other:?}"),
                Ok(None) => {
                    debug!("Worker {index} closed its output");
                    break;
                }
                Err(e) => {
                    error!("Failed to read from worker {index}: {e}");
                    break;
                }
            }
        }
        Self::fail_in_flight(index, &in_flight).await;
    }

    async fn fail_in_flight(index: usize, in_flight: &InFlight) {
        let Some(tasks) = in_flight.lock().await.take() else {
            return;
        };
        if !tasks.is_empty() {
            warn!("Worker {index} exited with {} tasks in flight", tasks.len());
        }
        for (_, completion) in tasks {
            let _ = completion.send(TaskOutcome::failure(format!(
                "worker process {index} exited before completing the task"
            )));
        }
    }

    /// Returns the node index.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Runs one task on this node, waiting for a free slot first.
    pub async fn execute(&self, task: TaskSpec) -> TaskOutcome {
        let Ok(_permit) = self.slots.acquire().await else {
            return TaskOutcome::failure(format!("worker {} is shut down", self.index));
        };

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (completion, outcome) = tokio::sync::oneshot::channel();
        {
            let mut in_flight = self.in_flight.lock().await;
            let Some(tasks) = in_flight.as_mut() else {
                return TaskOutcome::failure(format!(
                    "worker process {} is no longer running",
                    self.index
                ));
            };
            tasks.insert(seq, completion);
        }

        let task_id = task.id().clone();
        let message = WorkerMessage::Submit { seq, task };
        let sent = {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &message).await
        };
        if let Err(e) = sent {
            if let Some(tasks) = self.in_flight.lock().await.as_mut() {
                tasks.remove(&seq);
            }
            error!("Failed to send task {task_id} to worker {}: {e}", self.index);
            return TaskOutcome::failure(format!(
                "failed to send task to worker {}: {e}",
                self.index
            ));
        }

        outcome.await.unwrap_or_else(|_| {
            TaskOutcome::failure(format!("worker {} dropped the task", self.index))
        })
    }

    /// Stops the worker: cancels its tasks, waits for the process to exit
    /// and kills it after a grace period.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::ResourceTeardown`] if the process could not be
    /// reaped.
    pub async fn shutdown(&self) -> Result<()> {
        self.slots.close();

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = write_frame(&mut *writer, &WorkerMessage::Shutdown).await {
                debug!("Worker {} did not take shutdown request: {e}", self.index);
            }
        }

        let mut result = Ok(());
        if let Some(mut child) = self.child.lock().await.take() {
            match timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!("Worker {} exited with {status}", self.index),
                Ok(Err(e)) => {
                    result = Err(BenchError::ResourceTeardown {
                        reason: format!("waiting for worker {} failed: {e}", self.index),
                    });
                }
                Err(_) => {
                    warn!("Worker {} ignored shutdown, killing it", self.index);
                    if let Err(e) = child.kill().await {
                        result = Err(BenchError::ResourceTeardown {
                            reason: format!("killing worker {} failed: {e}", self.index),
                        });
                    }
                }
            }
        }

        if let Some(reader) = self.reader.lock().await.take() {
            if timeout(SHUTDOWN_GRACE, reader).await.is_err() {
                debug!("Reader of worker {} still open after shutdown", self.index);
            }
        }
        Self::fail_in_flight(self.index, &self.in_flight).await;

        self.guard
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        result
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

/// Executor running tasks in local worker processes.
pub struct ProcessExecutor {
    kind: ExecutorKind,
    queue: Arc<JobQueue>,
    nodes: Vec<Arc<Node>>,
    dispatchers: Mutex<JoinSet<()>>,
    capacity: usize,
    probe: ResourceProbe,
}

impl ProcessExecutor {
    /// Launches `node_count` worker processes with `worker_count` slots each.
    ///
    /// # Errors
    ///
    /// Returns an error if the kind is not a process kind or a worker cannot
    /// be launched. Workers launched before the failure are killed.
    pub fn start(config: &ExecutorConfig) -> Result<Self> {
        let program = worker_program(config)?;
        let probe = ResourceProbe::default();

        let nodes = (0..config.node_count())
            .map(|index| {
                Node::spawn(index, &program, config.worker_count(), &probe).map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;

        Self::with_nodes(config.kind(), nodes, config.worker_count(), probe)
    }

    /// Builds the executor on already connected nodes.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Configuration`] for [`ExecutorKind::Thread`] or
    /// an empty node list.
    pub fn with_nodes(
        kind: ExecutorKind,
        nodes: Vec<Arc<Node>>,
        slots_per_node: usize,
        probe: ResourceProbe,
    ) -> Result<Self> {
        if nodes.is_empty() {
            return Err(BenchError::config("process executor needs at least one node"));
        }

        let queue = Arc::new(JobQueue::new());
        let mut dispatchers = JoinSet::new();

        match kind {
            ExecutorKind::Thread => {
                return Err(BenchError::config(
                    "thread executor cannot run on worker processes",
                ));
            }
            ExecutorKind::HighThroughput => {
                dispatchers.spawn(Self::push_loop(Arc::clone(&queue), nodes.clone()));
            }
            ExecutorKind::WorkQueue => {
                for node in &nodes {
                    for _ in 0..slots_per_node {
                        dispatchers.spawn(Self::pull_loop(Arc::clone(&queue), Arc::clone(node)));
                    }
                }
            }
        }

        info!(
            "Initializing {kind} executor with {} worker processes x {slots_per_node} slots",
            nodes.len()
        );

        Ok(Self {
            kind,
            queue,
            capacity: nodes.len() * slots_per_node,
            nodes,
            dispatchers: Mutex::new(dispatchers),
            probe,
        })
    }

    /// Pushes each job to the next node in turn.
    async fn push_loop(queue: Arc<JobQueue>, nodes: Vec<Arc<Node>>) {
        let mut in_flight = JoinSet::new();
        let mut next = 0usize;

        while let Some(job) = queue.pop().await {
            while in_flight.try_join_next().is_some() {}

            let node = Arc::clone(&nodes[next % nodes.len()]);
            next = next.wrapping_add(1);
            in_flight.spawn(async move {
                let outcome = node.execute(job.task.clone()).await;
                job.complete(outcome);
            });
        }

        while in_flight.join_next().await.is_some() {}
    }

    /// Takes the next job whenever this slot of `node` is free.
    async fn pull_loop(queue: Arc<JobQueue>, node: Arc<Node>) {
        while let Some(job) = queue.pop().await {
            let outcome = node.execute(job.task.clone()).await;
            job.complete(outcome);
        }
        debug!("Slot on worker {} stopped: queue closed", node.index());
    }
}

impl Executor for ProcessExecutor {
    fn submit(&self, job: Job) {
        self.queue.push(job);
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn name(&self) -> &'static str {
        self.kind.label()
    }

    fn probe(&self) -> ResourceProbe {
        self.probe.clone()
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.queue.close();
            self.dispatchers.lock().await.shutdown().await;
            self.queue.cancel_pending().await;

            let mut failures = Vec::new();
            for node in &self.nodes {
                if let Err(e) = node.shutdown().await {
                    failures.push(e.to_string());
                }
            }

            if failures.is_empty() {
                ensure_released(&self.probe, self.name())
            } else {
                Err(BenchError::ResourceTeardown {
                    reason: failures.join("; "),
                })
            }
        })
    }
}

/// Resolves the worker binary: the explicit override or the running
/// executable.
///
/// # Errors
///
/// Returns an error if the current executable cannot be determined.
pub fn worker_program(config: &ExecutorConfig) -> Result<PathBuf> {
    match config.worker_program() {
        Some(program) => Ok(program.to_path_buf()),
        None => Ok(std::env::current_exe()?),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::executor::local::LocalRunner;
    use crate::task::{TaskHandle, TaskId, TaskKind, TaskRuntime};
    use crate::worker::serve;
    use std::time::Instant;

    /// Connects a node to an in-process worker over a duplex pipe.
    fn in_memory_node(index: usize, slots: usize, probe: &ResourceProbe) -> Arc<Node> {
        let (pool_side, worker_side) = tokio::io::duplex(64 * 1024);
        let (worker_reader, worker_writer) = tokio::io::split(worker_side);
        tokio::spawn(serve(
            worker_reader,
            worker_writer,
            slots,
            Arc::new(LocalRunner::new()),
        ));

        let (pool_reader, pool_writer) = tokio::io::split(pool_side);
        Arc::new(Node::connect(
            index,
            pool_reader,
            pool_writer,
            slots,
            Some(probe.enter()),
        ))
    }

    fn executor(kind: ExecutorKind, nodes: usize, slots: usize) -> ProcessExecutor {
        let probe = ResourceProbe::default();
        let nodes = (0..nodes)
            .map(|index| in_memory_node(index, slots, &probe))
            .collect();
        ProcessExecutor::with_nodes(kind, nodes, slots, probe).unwrap()
    }

    fn submit(executor: &ProcessExecutor, index: usize, kind: TaskKind) -> TaskHandle {
        let id = TaskId::job(index);
        let (handle, completion) = TaskHandle::pending(id.clone());
        executor.submit(Job::new(
            TaskSpec::new(id, kind, TaskRuntime::InProcess),
            completion,
        ));
        handle
    }

    #[tokio::test]
    async fn test_push_dispatch_completes_all_tasks() {
        let executor = executor(ExecutorKind::HighThroughput, 2, 2);
        assert_eq!(executor.capacity(), 4);
        assert_eq!(executor.name(), "htex");

        let handles: Vec<_> = (0..10)
            .map(|i| submit(&executor, i, TaskKind::NoOp))
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let outcome = handle.wait().await.unwrap();
            assert_eq!(outcome, TaskOutcome::Success(format!("Finished job job_{i}")));
        }

        executor.shutdown().await.unwrap();
        assert_eq!(executor.probe().live(), 0);
    }

    #[tokio::test]
    async fn test_pull_dispatch_runs_in_parallel() {
        let executor = executor(ExecutorKind::WorkQueue, 2, 2);
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|i| submit(&executor, i, TaskKind::Sleep(Duration::from_millis(300))))
            .collect();
        for handle in handles {
            assert!(handle.wait().await.unwrap().is_success());
        }

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(1000), "took {elapsed:?}");

        executor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_task_ids_do_not_collide() {
        let executor = executor(ExecutorKind::WorkQueue, 1, 2);
        let first = submit(&executor, 0, TaskKind::NoOp);
        let second = submit(&executor, 0, TaskKind::NoOp);

        assert!(first.wait().await.unwrap().is_success());
        assert!(second.wait().await.unwrap().is_success());
        executor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_exit_fails_in_flight_tasks() {
        let (pool_side, worker_side) = tokio::io::duplex(1024);
        let (pool_reader, pool_writer) = tokio::io::split(pool_side);
        let node = Node::connect(0, pool_reader, pool_writer, 1, None);

        // A worker that reads one frame and dies without answering.
        let dying = tokio::spawn(async move {
            let mut worker_side = worker_side;
            let _: Option<WorkerMessage> = read_frame(&mut worker_side).await.unwrap();
        });

        let task = TaskSpec::new(TaskId::job(0), TaskKind::NoOp, TaskRuntime::InProcess);
        let outcome = node.execute(task.clone()).await;
        dying.await.unwrap();

        assert!(outcome.error().unwrap().contains("exited"));

        let after = node.execute(task).await;
        assert!(!after.is_success());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queued_tasks() {
        let executor = executor(ExecutorKind::HighThroughput, 1, 1);
        let handles: Vec<_> = (0..3)
            .map(|i| submit(&executor, i, TaskKind::Sleep(Duration::from_secs(30))))
            .collect();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let start = Instant::now();
        executor.shutdown().await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));

        for handle in handles {
            let resolved = handle.wait().await;
            assert!(resolved.map_or(true, |outcome| !outcome.is_success()));
        }
        assert_eq!(executor.probe().live(), 0);
    }

    #[test]
    fn test_thread_kind_rejected() {
        let result = ProcessExecutor::with_nodes(
            ExecutorKind::Thread,
            Vec::new(),
            1,
            ResourceProbe::default(),
        );
        assert!(result.is_err());
    }
}
