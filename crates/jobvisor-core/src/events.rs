use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Something that happened to a job, broadcast by the manager.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: String,
    pub run_id: Option<Uuid>,
    pub at: DateTime<Utc>,
    pub kind: JobEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEventKind {
    Started,
    RunSucceeded { run: u64 },
    RunFailed { run: u64, error: String },
    Exited { error: String },
    RestartScheduled { attempt: u32, delay_secs: u64 },
    RestartLimitReached { max: u32 },
    LaunchFailed { error: String },
    Stopped { forced: bool },
}

impl JobEvent {
    pub fn new(job_id: &str, run_id: Option<Uuid>, kind: JobEventKind) -> Self {
        Self {
            job_id: job_id.to_string(),
            run_id,
            at: Utc::now(),
            kind,
        }
    }
}
