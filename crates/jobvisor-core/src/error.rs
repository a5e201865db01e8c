use std::time::Duration;
use thiserror::Error;

/// Errors returned to callers of the job manager.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {job} failed to launch: {reason}")]
    LaunchFailure { job: String, reason: String },

    #[error("Invalid job spec for {job}: {reason}")]
    InvalidSpec { job: String, reason: String },

    #[error("Job manager is shutting down, not starting {0}")]
    ShuttingDown(String),

    #[error("Job registered twice: {0}")]
    DuplicateJob(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a job stopped doing useful work. The display text is what ends up
/// in a job's `last_error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    #[error("task failed: {0}")]
    TaskFailure(String),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task exited without a stop request")]
    ExitedUnexpectedly,

    #[error("{count} consecutive scheduled runs failed")]
    TooManyFailures { count: u32 },

    #[error("restart limit of {max} reached")]
    RestartLimitExceeded { max: u32 },

    #[error("launch failed: {0}")]
    LaunchFailure(String),

    #[error("did not stop within {grace:?}, execution forcibly reclaimed")]
    ShutdownTimeout { grace: Duration },
}
