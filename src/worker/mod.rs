//! Worker-process side of the process pool.
//!
//! A worker reads [`WorkerMessage::Submit`] frames, runs up to `slots` tasks
//! at a time and answers each with a [`WorkerMessage::Completed`] frame.
//! The `taskbench worker` subcommand serves over stdin/stdout.

use crate::error::{BenchError, Result};
use crate::executor::local::run_isolated;
use crate::executor::TaskRunner;
use crate::protocol::{read_frame, write_frame, WorkerMessage};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Serves tasks from `reader` until shutdown or end of input.
///
/// On [`WorkerMessage::Shutdown`] running tasks are cancelled. On end of
/// input running tasks are drained and their results still written.
///
/// # Errors
///
/// Returns an error if `slots` is zero or the input carries a malformed
/// frame.
pub async fn serve<R, W>(
    mut reader: R,
    writer: W,
    slots: usize,
    runner: Arc<dyn TaskRunner>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    if slots == 0 {
        return Err(BenchError::config("worker needs at least one slot"));
    }

    info!("Worker serving with {slots} slots");
    let writer = Arc::new(Mutex::new(writer));
    let permits = Arc::new(Semaphore::new(slots));
    let mut running = JoinSet::new();

    loop {
        while let Some(finished) = running.try_join_next() {
            if let Err(e) = finished {
                warn!("Worker task ended abnormally: {e}");
            }
        }

        let message = match read_frame::<_, WorkerMessage>(&mut reader).await {
            Ok(message) => message,
            Err(e) => {
                error!("Failed to read from pool: {e}");
                running.shutdown().await;
                return Err(e);
            }
        };

        match message {
            Some(WorkerMessage::Submit { seq, task }) => {
                debug!("Received task {} (seq {seq})", task.id());
                let runner = Arc::clone(&runner);
                let writer = Arc::clone(&writer);
                let permits = Arc::clone(&permits);

                running.spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    let outcome = run_isolated(&runner, task).await;
                    let reply = WorkerMessage::Completed { seq, outcome };
                    let mut writer = writer.lock().await;
                    if let Err(e) = write_frame(&mut *writer, &reply).await {
                        error!("Failed to send result for seq {seq}: {e}");
                    }
                });
            }
            Some(WorkerMessage::Shutdown) => {
                info!("Shutdown requested, cancelling {} tasks", running.len());
                running.shutdown().await;
                return Ok(());
            }
            Some(WorkerMessage::Completed { seq, .. }) => {
                warn!("Unexpected result frame (seq {seq}) from pool");
            }
            None => {
                info!("Input closed, draining {} tasks", running.len());
                while running.join_next().await.is_some() {}
                return Ok(());
            }
        }
    }
}
