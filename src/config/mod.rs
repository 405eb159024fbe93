//! Executor configuration.
//!
//! An [`ExecutorConfig`] is created from caller parameters, validated once by
//! its builder and consumed by the executor factory.

use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default UDP address of the monitoring hub.
pub const DEFAULT_MONITOR_ADDRESS: &str = "127.0.0.1:55055";

/// Backend kind built by the executor factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// In-process worker pool.
    Thread,
    /// Worker processes fed by a round-robin dispatcher.
    #[serde(rename = "htex", alias = "high_throughput")]
    HighThroughput,
    /// Worker processes whose slots pull from a shared queue.
    WorkQueue,
}

impl ExecutorKind {
    /// Name used in CLI flags and report tables.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Thread => "thread",
            Self::HighThroughput => "htex",
            Self::WorkQueue => "work_queue",
        }
    }

    /// Returns whether this kind runs tasks in worker processes.
    #[must_use]
    pub const fn uses_processes(&self) -> bool {
        !matches!(self, Self::Thread)
    }
}

impl FromStr for ExecutorKind {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "thread" => Ok(Self::Thread),
            "htex" | "high-throughput" | "high_throughput" => Ok(Self::HighThroughput),
            "work_queue" | "work-queue" => Ok(Self::WorkQueue),
            other => Err(BenchError::config(format!(
                "Invalid executor specifier: {other}"
            ))),
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Validated executor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    kind: ExecutorKind,
    worker_count: usize,
    node_count: usize,
    monitoring_enabled: bool,
    worker_program: Option<PathBuf>,
    monitor_address: String,
}

impl ExecutorConfig {
    /// Creates a new config builder.
    #[must_use]
    pub fn builder() -> ExecutorConfigBuilder {
        ExecutorConfigBuilder::default()
    }

    /// Returns the backend kind.
    #[must_use]
    pub const fn kind(&self) -> ExecutorKind {
        self.kind
    }

    /// Returns the number of workers per node.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Returns the number of nodes (worker processes for process kinds).
    #[must_use]
    pub const fn node_count(&self) -> usize {
        self.node_count
    }

    /// Returns the total number of concurrent task slots.
    #[must_use]
    pub const fn total_slots(&self) -> usize {
        self.worker_count * self.node_count
    }

    /// Returns whether the monitoring side channel is requested.
    #[must_use]
    pub const fn monitoring_enabled(&self) -> bool {
        self.monitoring_enabled
    }

    /// Returns the worker binary override, if any.
    #[must_use]
    pub fn worker_program(&self) -> Option<&Path> {
        self.worker_program.as_deref()
    }

    /// Returns the monitoring hub address.
    #[must_use]
    pub fn monitor_address(&self) -> &str {
        &self.monitor_address
    }
}

/// Builder for [`ExecutorConfig`].
#[derive(Debug, Default)]
pub struct ExecutorConfigBuilder {
    kind: Option<ExecutorKind>,
    worker_count: Option<usize>,
    node_count: Option<usize>,
    monitoring_enabled: bool,
    worker_program: Option<PathBuf>,
    monitor_address: Option<String>,
}

impl ExecutorConfigBuilder {
    /// Sets the backend kind.
    #[must_use]
    pub const fn kind(mut self, kind: ExecutorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Sets the number of workers per node.
    #[must_use]
    pub const fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    /// Sets the number of nodes.
    #[must_use]
    pub const fn node_count(mut self, count: usize) -> Self {
        self.node_count = Some(count);
        self
    }

    /// Enables or disables the monitoring side channel.
    #[must_use]
    pub const fn monitoring(mut self, enabled: bool) -> Self {
        self.monitoring_enabled = enabled;
        self
    }

    /// Sets the binary launched for worker processes.
    #[must_use]
    pub fn worker_program<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.worker_program = Some(path.into());
        self
    }

    /// Sets the monitoring hub address (`host:port`).
    #[must_use]
    pub fn monitor_address<S: Into<String>>(mut self, address: S) -> Self {
        self.monitor_address = Some(address.into());
        self
    }

    /// Validates and builds the config.
    ///
    /// Worker count defaults to the number of CPUs, node count to 1.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Configuration`] if the kind is missing or a
    /// count is zero.
    pub fn build(self) -> Result<ExecutorConfig> {
        let kind = self
            .kind
            .ok_or_else(|| BenchError::config("Executor kind not set"))?;

        let worker_count = self.worker_count.unwrap_or_else(num_cpus::get);
        if worker_count == 0 {
            return Err(BenchError::config("worker_count must be at least 1"));
        }

        let node_count = self.node_count.unwrap_or(1);
        if node_count == 0 {
            return Err(BenchError::config("node_count must be at least 1"));
        }

        worker_count
            .checked_mul(node_count)
            .ok_or_else(|| BenchError::config("worker_count x node_count overflows"))?;

        Ok(ExecutorConfig {
            kind,
            worker_count,
            node_count,
            monitoring_enabled: self.monitoring_enabled,
            worker_program: self.worker_program,
            monitor_address: self
                .monitor_address
                .unwrap_or_else(|| DEFAULT_MONITOR_ADDRESS.to_string()),
        })
    }
}
