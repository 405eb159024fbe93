//! Command-line driver for taskbench.
//!
//! `run` times one configuration, `sweep` times every combination of a
//! sweep file and writes a CSV table, `worker` is the worker-process mode
//! launched by the process executors.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use taskbench::config::{ExecutorConfig, ExecutorKind, DEFAULT_MONITOR_ADDRESS};
use taskbench::executor::local::LocalRunner;
use taskbench::executor::ExecutorFactory;
use taskbench::sweep::{self, SweepConfig};
use taskbench::task::TaskRuntime;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Benchmark harness for task-parallel executors
#[derive(Parser, Debug)]
#[command(name = "taskbench")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run basic sleep or no-op tasks on one executor
    Run {
        /// Type of task to run (python, bash)
        #[arg(short = 'y', long = "ttype", default_value = "python")]
        ttype: TaskRuntime,

        /// Number of tasks to run
        #[arg(short = 'n', long = "ntasks", default_value_t = 1)]
        ntasks: usize,

        /// Seconds each task sleeps; 0 runs no-op tasks
        #[arg(short = 't', long = "time", default_value = "0", value_parser = parse_seconds)]
        time: Duration,

        /// Executor kind (thread, htex, work_queue)
        #[arg(short = 'e', long = "exec", default_value = "thread")]
        exec: ExecutorKind,

        /// Workers per node
        #[arg(short = 'w', long = "workers", default_value_t = 1)]
        workers: usize,

        /// Number of nodes
        #[arg(long, default_value_t = 1)]
        nodes: usize,

        /// Enable task monitoring
        #[arg(short = 'm', long = "monitoring")]
        monitoring: bool,

        /// Monitoring hub address
        #[arg(long, default_value = DEFAULT_MONITOR_ADDRESS)]
        monitor_address: String,
    },

    /// Run every combination of a sweep and write the timing table
    Sweep {
        /// Sweep file (TOML); defaults to the built-in sweep
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output CSV file
        #[arg(short, long, default_value = "taskbench_timing_results.csv")]
        output: PathBuf,

        /// Write one CPU profile per case into this directory
        #[cfg(unix)]
        #[arg(long)]
        profile_dir: Option<PathBuf>,
    },

    /// Serve tasks over stdin/stdout (started by the process executors)
    #[command(hide = true)]
    Worker {
        /// Number of tasks to run concurrently
        #[arg(long, default_value_t = 1)]
        slots: usize,
    },
}

fn parse_seconds(value: &str) -> std::result::Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|e| format!("invalid number of seconds '{value}': {e}"))?;
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid duration '{value}': {e}"))
}

/// Run name, e.g. `python_n=10_t=0_e=thread_w=1_nodes=1_m=False`.
fn run_name(ttype: TaskRuntime, ntasks: usize, time: Duration, config: &ExecutorConfig) -> String {
    format!(
        "{ttype}_n={ntasks}_t={}_e={}_w={}_nodes={}_m={}",
        time.as_secs_f64(),
        config.kind(),
        config.worker_count(),
        config.node_count(),
        if config.monitoring_enabled() { "True" } else { "False" }
    )
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    // Worker stdout carries frames, so every log line goes to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Run {
            ttype,
            ntasks,
            time,
            exec,
            workers,
            nodes,
            monitoring,
            monitor_address,
        } => {
            let config = ExecutorConfig::builder()
                .kind(exec)
                .worker_count(workers)
                .node_count(nodes)
                .monitoring(monitoring)
                .monitor_address(monitor_address)
                .build()
                .context("invalid executor configuration")?;

            let mut factory = ExecutorFactory::new();
            let executor = match factory.build(config).await {
                Ok(executor) => executor,
                Err(e) if e.is_fatal() => {
                    return Err(e).context("invalid executor configuration");
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to start {exec} executor"));
                }
            };
            let name = run_name(ttype, ntasks, time, executor.config());
            info!("Running test: {name}");

            let report = taskbench::run_cycle(&executor, ttype, time, ntasks).await;
            if let Err(e) = factory.teardown().await {
                warn!("Executor was not released cleanly: {e}");
            }

            println!(
                "{name}: {} tasks in {:.3} seconds, {} failed",
                report.results().len(),
                report.elapsed().as_secs_f64(),
                report.failed()
            );
        }
        Commands::Sweep {
            config,
            output,
            #[cfg(unix)]
            profile_dir,
        } => {
            let sweep = match config {
                Some(path) => SweepConfig::load(&path)
                    .with_context(|| format!("failed to load sweep from {}", path.display()))?,
                None => SweepConfig::default(),
            };

            let mut factory = ExecutorFactory::new();
            #[cfg(unix)]
            let records = match profile_dir {
                Some(dir) => taskbench::profile::profile_sweep(&mut factory, &sweep, &dir)
                    .await
                    .with_context(|| format!("failed to profile sweep into {}", dir.display()))?,
                None => sweep::run_sweep(&mut factory, &sweep)
                    .await
                    .context("invalid sweep")?,
            };
            #[cfg(not(unix))]
            let records = sweep::run_sweep(&mut factory, &sweep)
                .await
                .context("invalid sweep")?;
            sweep::write_csv(&output, &records)
                .with_context(|| format!("failed to write {}", output.display()))?;
        }
        Commands::Worker { slots } => {
            taskbench::worker::serve(
                tokio::io::stdin(),
                tokio::io::stdout(),
                slots,
                Arc::new(LocalRunner::new()),
            )
            .await
            .context("worker failed")?;
        }
    }

    Ok(())
}
