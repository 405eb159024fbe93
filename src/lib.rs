//! # taskbench: benchmark harness for task-parallel executors
//!
//! taskbench times how long an executor takes to run a batch of independent
//! tasks. An executor is either an in-process worker pool or a pool of local
//! worker processes; a task either completes immediately or sleeps for a
//! fixed duration.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use taskbench::config::{ExecutorConfig, ExecutorKind};
//! use taskbench::executor::ExecutorFactory;
//! use taskbench::task::TaskRuntime;
//!
//! #[tokio::main]
//! async fn main() -> taskbench::error::Result<()> {
//!     let config = ExecutorConfig::builder()
//!         .kind(ExecutorKind::Thread)
//!         .worker_count(8)
//!         .build()?;
//!
//!     let mut factory = ExecutorFactory::new();
//!     let executor = factory.build(config).await?;
//!
//!     let report =
//!         taskbench::run_cycle(&executor, TaskRuntime::InProcess, Duration::from_secs(1), 64).await;
//!     println!("{} tasks in {:?}", report.results().len(), report.elapsed());
//!
//!     factory.teardown().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Executor**: builds and tears down backends ([`executor`])
//! - **Submit**: turns a task count into handles ([`submit`])
//! - **Collect**: turns handles into ordered results ([`collect`])
//! - **Sweep**: runs a cycle per parameter combination ([`sweep`])
//! - **Profile**: optional CPU profile per sweep case (`profile`, unix only)
//!
//! Worker processes speak the frame protocol in [`protocol`] and are served
//! by [`worker`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

pub mod collect;
pub mod config;
pub mod error;
pub mod executor;
pub mod monitor;
#[cfg(unix)]
pub mod profile;
pub mod protocol;
pub mod submit;
pub mod sweep;
pub mod task;
pub mod worker;

pub use collect::collect;
pub use config::{ExecutorConfig, ExecutorKind};
pub use error::{BenchError, Result};
pub use executor::{ExecutorFactory, ExecutorHandle};
pub use submit::submit;
pub use task::{TaskOutcome, TaskResult, TaskRuntime};

use std::time::{Duration, Instant};
use tracing::info;

/// Timing and outcomes of one submit+collect cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    elapsed: Duration,
    results: Vec<TaskResult>,
}

impl CycleReport {
    /// Wall time from first submission to last collected result.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Results in submission order.
    #[must_use]
    pub fn results(&self) -> &[TaskResult] {
        &self.results
    }

    /// Number of successful tasks.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Number of failed tasks.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Submits `count` tasks, collects every result and times the whole cycle.
///
/// Task failures are reported in the results; this never fails.
pub async fn run_cycle(
    executor: &ExecutorHandle,
    runtime: TaskRuntime,
    duration: Duration,
    count: usize,
) -> CycleReport {
    let start = Instant::now();
    let handles = submit(executor, runtime, duration, count);
    let results = collect(handles).await;
    let elapsed = start.elapsed();

    let report = CycleReport { elapsed, results };
    info!(
        "Cycle on {} executor: {count} tasks in {:.3}s ({} failed)",
        executor.name(),
        elapsed.as_secs_f64(),
        report.failed()
    );
    report
}
