pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod log_buffer;
pub mod manager;
pub mod runner;
pub mod state;
pub mod task;

pub use config::{Config, JobConfig, SupervisorSettings};
pub use error::{JobFailure, SupervisorError};
pub use events::{JobEvent, JobEventKind};
pub use job::{JobMode, JobSpec};
pub use log_buffer::{LogBuffer, LogLevel, LogLine};
pub use manager::{JobManager, ShutdownReport};
pub use runner::{JobRunner, StopOutcome};
pub use state::{JobSnapshot, JobState, JobStatus};
pub use task::{task_fn, JobTask, TaskContext};
