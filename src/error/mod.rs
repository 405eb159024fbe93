//! Error types for taskbench.
//!
//! Only [`BenchError::Configuration`] is allowed to abort a run. Everything
//! else is contained per task or logged by the executor lifecycle.

use std::io;
use thiserror::Error;

/// Result type alias for taskbench operations.
pub type Result<T> = std::result::Result<T, BenchError>;

/// Error type for all taskbench operations.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Invalid executor kind or parameter. Fatal, raised before any task
    /// is submitted.
    #[error("Invalid configuration: {reason}")]
    Configuration {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// A single task failed or terminated abnormally.
    #[error("Task {task} failed: {message}")]
    TaskExecution {
        /// Id of the failing task.
        task: String,
        /// Human-readable error message.
        message: String,
    },

    /// Releasing a previous executor's resources did not complete cleanly.
    #[error("Executor teardown incomplete: {reason}")]
    ResourceTeardown {
        /// What could not be released.
        reason: String,
    },

    /// I/O error (process pipes, sockets, output files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed or unexpected frame on a worker connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Encoding or decoding of a message, record or config file failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The sampling profiler could not start or report.
    #[error("Profiling error: {0}")]
    Profiling(String),
}

impl BenchError {
    /// Shorthand for a [`BenchError::Configuration`] error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Returns true if this error must abort the whole run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

impl From<bincode::Error> for BenchError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BenchError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(unix)]
impl From<pprof::Error> for BenchError {
    fn from(err: pprof::Error) -> Self {
        Self::Profiling(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let err = BenchError::config("worker_count must be at least 1");
        assert!(format!("{err}").contains("Invalid configuration"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_task_execution_error_names_task() {
        let err = BenchError::TaskExecution {
            task: "job_3".to_string(),
            message: "exit code 1".to_string(),
        };
        let text = format!("{err}");
        assert!(text.contains("job_3"));
        assert!(text.contains("exit code 1"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_teardown_error_not_fatal() {
        let err = BenchError::ResourceTeardown {
            reason: "worker 0 did not exit".to_string(),
        };
        assert!(!err.is_fatal());
    }
}
