//! Taskpool Error Types
//!
//! Centralized error handling using thiserror for type-safe errors.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::TaskId;

/// Boxed error produced by a task body. This is the per-task error channel:
/// a failing body never vanishes silently, its error is recorded on the task.
pub type BodyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for taskpool
#[derive(Error, Debug)]
pub enum TaskPoolError {
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Pool construction and worker bring-up errors
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Failed to build worker runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Worker count must be at least 1")]
    ZeroWorkers,
}

/// Task registration errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Owning pool is no longer alive")]
    PoolGone,

    #[error("Pool is shutting down, new work is not accepted")]
    ShuttingDown,

    #[error("Task '{id}' is not registered in the graph")]
    UnknownOwner { id: TaskId },
}

/// Per-task execution failures
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task body failed: {0}")]
    Body(#[source] BodyError),

    #[error("Task body panicked: {message}")]
    Panicked { message: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Failed to read configuration '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type alias for taskpool operations
pub type Result<T> = std::result::Result<T, TaskPoolError>;

/// Result type alias for pool bring-up
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Result type alias for task registration
pub type SchedResult<T> = std::result::Result<T, SchedulerError>;

/// Result type alias for configuration loading
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
