//! Parameter sweeps.
//!
//! A [`SweepConfig`] lists values for every run parameter. [`run_sweep`]
//! runs one timed cycle per combination and [`write_csv`] stores the timing
//! table.
//!
//! ```toml
//! types = ["python", "bash"]
//! executors = ["thread", "htex"]
//! times = [0, 5]
//! ntasks = [100]
//! workers = [4]
//! num_nodes = [1]
//! monitoring = [false]
//! ```

use crate::config::{ExecutorConfig, ExecutorKind, DEFAULT_MONITOR_ADDRESS};
use crate::error::{BenchError, Result};
use crate::executor::ExecutorFactory;
use crate::run_cycle;
use crate::task::TaskRuntime;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Header of the timing table. The first, unnamed column is the row index.
pub const CSV_HEADER: &str = ",type,executor,time_per_task,ntasks,workers,nodes,monitoring,total time";

/// Parameter lists for a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Task runtimes.
    pub types: Vec<TaskRuntime>,
    /// Executor kinds.
    pub executors: Vec<ExecutorKind>,
    /// Per-task durations in seconds.
    pub times: Vec<f64>,
    /// Task counts.
    pub ntasks: Vec<usize>,
    /// Workers per node.
    pub workers: Vec<usize>,
    /// Node counts.
    pub num_nodes: Vec<usize>,
    /// Monitoring flags.
    pub monitoring: Vec<bool>,
    /// Worker binary for process executors.
    pub worker_program: Option<PathBuf>,
    /// Telemetry hub address.
    pub monitor_address: String,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            types: vec![TaskRuntime::InProcess],
            executors: vec![ExecutorKind::HighThroughput, ExecutorKind::WorkQueue],
            times: vec![0.0, 20.0],
            ntasks: vec![6400],
            workers: vec![64],
            num_nodes: vec![1],
            monitoring: vec![true, false],
            worker_program: None,
            monitor_address: DEFAULT_MONITOR_ADDRESS.to_string(),
        }
    }
}

impl SweepConfig {
    /// Loads a sweep from a TOML file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or a
    /// duration is negative or not finite.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every duration.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Configuration`] for a negative or non-finite
    /// duration.
    pub fn validate(&self) -> Result<()> {
        for &seconds in &self.times {
            Duration::try_from_secs_f64(seconds).map_err(|_| {
                BenchError::config(format!("Invalid time per task: {seconds}"))
            })?;
        }
        Ok(())
    }

    /// Returns the number of cases without building them.
    #[must_use]
    pub fn case_count(&self) -> usize {
        [
            self.types.len(),
            self.executors.len(),
            self.times.len(),
            self.ntasks.len(),
            self.workers.len(),
            self.num_nodes.len(),
            self.monitoring.len(),
        ]
        .iter()
        .product()
    }

    /// Expands the lists into every combination.
    ///
    /// The last list varies fastest: runtime, executor, time, tasks,
    /// workers, nodes, monitoring.
    ///
    /// # Errors
    ///
    /// Returns an error if a duration is invalid.
    pub fn cases(&self) -> Result<Vec<SweepCase>> {
        self.validate()?;

        let mut cases = Vec::with_capacity(self.case_count());
        for &runtime in &self.types {
            for &executor in &self.executors {
                for &seconds in &self.times {
                    for &ntasks in &self.ntasks {
                        for &workers in &self.workers {
                            for &nodes in &self.num_nodes {
                                for &monitoring in &self.monitoring {
                                    cases.push(SweepCase {
                                        runtime,
                                        executor,
                                        time_per_task: seconds,
                                        ntasks,
                                        workers,
                                        nodes,
                                        monitoring,
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(cases)
    }
}

/// One parameter combination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepCase {
    /// Task runtime.
    pub runtime: TaskRuntime,
    /// Executor kind.
    pub executor: ExecutorKind,
    /// Per-task duration in seconds.
    pub time_per_task: f64,
    /// Number of tasks.
    pub ntasks: usize,
    /// Workers per node.
    pub workers: usize,
    /// Number of nodes.
    pub nodes: usize,
    /// Whether monitoring is on.
    pub monitoring: bool,
}

impl SweepCase {
    /// Run name, e.g. `python_n=10_t=0_e=thread_w=1_nodes=1_m=False`.
    #[must_use]
    pub fn name(&self) -> String {
        format!(
            "{}_n={}_t={}_e={}_w={}_nodes={}_m={}",
            self.runtime,
            self.ntasks,
            self.time_per_task,
            self.executor,
            self.workers,
            self.nodes,
            py_bool(self.monitoring)
        )
    }

    /// Per-task duration. Invalid values count as zero; [`SweepConfig::cases`]
    /// rejects them up front.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.time_per_task).unwrap_or_default()
    }

    fn executor_config(&self, sweep: &SweepConfig) -> Result<ExecutorConfig> {
        let mut builder = ExecutorConfig::builder()
            .kind(self.executor)
            .worker_count(self.workers)
            .node_count(self.nodes)
            .monitoring(self.monitoring)
            .monitor_address(sweep.monitor_address.clone());
        if let Some(program) = &sweep.worker_program {
            builder = builder.worker_program(program.clone());
        }
        builder.build()
    }
}

/// Timing of one finished case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRecord {
    /// Task runtime.
    pub runtime: TaskRuntime,
    /// Executor kind.
    pub executor: ExecutorKind,
    /// Per-task duration in seconds.
    pub time_per_task: f64,
    /// Number of tasks.
    pub ntasks: usize,
    /// Workers per node.
    pub workers: usize,
    /// Number of nodes.
    pub nodes: usize,
    /// Whether monitoring was on.
    pub monitoring: bool,
    /// Seconds from executor build to the last collected result.
    pub total_time: f64,
    /// Number of failed tasks.
    pub failed: usize,
}

/// Runs every case of `sweep` and returns one record per case that ran.
///
/// Each case builds its own executor from `factory` and tears it down after
/// its cycle. A case whose executor cannot be built is logged and skipped.
///
/// # Errors
///
/// Returns an error only if the sweep itself is invalid.
pub async fn run_sweep(factory: &mut ExecutorFactory, sweep: &SweepConfig) -> Result<Vec<SweepRecord>> {
    let cases = sweep.cases()?;
    info!("Running sweep of {} cases", cases.len());

    let mut records = Vec::with_capacity(cases.len());
    for (number, case) in cases.iter().enumerate() {
        if let Some(record) = run_case(factory, sweep, number, case).await {
            records.push(record);
        }
    }
    Ok(records)
}

/// Builds the executor for one case, runs its cycle and tears it down.
///
/// Returns `None` if the executor could not be built.
pub async fn run_case(
    factory: &mut ExecutorFactory,
    sweep: &SweepConfig,
    number: usize,
    case: &SweepCase,
) -> Option<SweepRecord> {
    info!("Running test {number}: {}", case.name());

    let start = Instant::now();
    let executor = match case.executor_config(sweep) {
        Ok(config) => factory.build(config).await,
        Err(e) => Err(e),
    };
    let executor = match executor {
        Ok(executor) => executor,
        Err(e) if e.is_fatal() => {
            error!("Skipping invalid test {number} ({}): {e}", case.name());
            return None;
        }
        Err(e) => {
            error!("Skipping test {number} ({}), executor did not start: {e}", case.name());
            return None;
        }
    };

    let report = run_cycle(&executor, case.runtime, case.duration(), case.ntasks).await;
    let total_time = start.elapsed().as_secs_f64();
    if let Err(e) = factory.teardown().await {
        warn!("Executor for test {number} was not released cleanly: {e}");
    }

    info!("Finished test {number} in {total_time} seconds");
    Some(SweepRecord {
        runtime: case.runtime,
        executor: case.executor,
        time_per_task: case.time_per_task,
        ntasks: case.ntasks,
        workers: case.workers,
        nodes: case.nodes,
        monitoring: case.monitoring,
        total_time,
        failed: report.failed(),
    })
}

/// Renders records as the timing table, header included.
#[must_use]
pub fn to_csv(records: &[SweepRecord]) -> String {
    let mut csv = String::from(CSV_HEADER);
    csv.push('\n');
    for (index, record) in records.iter().enumerate() {
        let _ = writeln!(
            csv,
            "{index},{},{},{},{},{},{},{},{}",
            record.runtime,
            record.executor,
            record.time_per_task,
            record.ntasks,
            record.workers,
            record.nodes,
            py_bool(record.monitoring),
            record.total_time
        );
    }
    csv
}

/// Writes the timing table to `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_csv(path: &Path, records: &[SweepRecord]) -> Result<()> {
    std::fs::write(path, to_csv(records))?;
    info!("Wrote {} rows to {}", records.len(), path.display());
    Ok(())
}

const fn py_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}
