use crate::error::JobFailure;
use crate::job::{JobMode, JobSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
    RestartPending,
}

impl JobStatus {
    /// Statuses in which the job owns a live execution context.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Starting | JobStatus::Running | JobStatus::RestartPending
        )
    }

    /// Statuses a job settles in on its own.
    pub fn is_settled(&self) -> bool {
        matches!(self, JobStatus::Stopped | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Stopped => write!(f, "stopped"),
            JobStatus::Starting => write!(f, "starting"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Stopping => write!(f, "stopping"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::RestartPending => write!(f, "restart_pending"),
        }
    }
}

/// Mutable state of one job, owned by its runner.
#[derive(Debug, Clone)]
pub struct JobState {
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Auto-restarts since the last manual start.
    pub restart_count: u32,
    /// Set by a caller-initiated stop; the only input to the restart decision.
    pub requested_stop: bool,
    pub run_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl Default for JobState {
    fn default() -> Self {
        Self {
            status: JobStatus::Stopped,
            started_at: None,
            stopped_at: None,
            last_error: None,
            last_error_at: None,
            restart_count: 0,
            requested_stop: false,
            run_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            last_run_at: None,
            next_run_at: None,
        }
    }
}

impl JobState {
    /// Manual start: clears the stop flag and the restart counter.
    pub fn mark_starting(&mut self) {
        self.status = JobStatus::Starting;
        self.requested_stop = false;
        self.restart_count = 0;
        self.consecutive_failures = 0;
    }

    /// Automatic resumption after `RestartPending`; keeps the restart counter.
    pub fn mark_restarting(&mut self) {
        self.status = JobStatus::Starting;
        self.consecutive_failures = 0;
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.stopped_at = None;
    }

    pub fn mark_stopping(&mut self) {
        self.status = JobStatus::Stopping;
        self.requested_stop = true;
    }

    pub fn mark_stopped(&mut self) {
        self.status = JobStatus::Stopped;
        self.stopped_at = Some(Utc::now());
        self.next_run_at = None;
    }

    pub fn mark_failed(&mut self, failure: &JobFailure) {
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.stopped_at = Some(now);
        self.next_run_at = None;
        self.record_error(failure);
    }

    pub fn record_error(&mut self, failure: &JobFailure) {
        self.last_error = Some(failure.to_string());
        self.last_error_at = Some(Utc::now());
    }

    pub fn mark_run_started(&mut self) -> u64 {
        self.run_count += 1;
        self.last_run_at = Some(Utc::now());
        self.run_count
    }

    pub fn mark_run_succeeded(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn mark_run_failed(&mut self, failure: &JobFailure) {
        self.failure_count += 1;
        self.consecutive_failures += 1;
        self.record_error(failure);
    }
}

/// Point-in-time copy of a job's spec and state, as handed to callers.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub name: String,
    pub description: String,
    pub mode: JobMode,
    pub status: JobStatus,
    pub interval_seconds: u64,
    pub auto_restart: bool,
    pub max_restarts: u32,
    pub restart_count: u32,
    pub run_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub log_count: usize,
}

impl JobSnapshot {
    pub fn capture(spec: &JobSpec, state: &JobState, log_count: usize) -> Self {
        Self {
            id: spec.id.clone(),
            name: spec.display_name().to_string(),
            description: spec.description.clone(),
            mode: spec.mode,
            status: state.status,
            interval_seconds: spec.interval_seconds,
            auto_restart: spec.auto_restart,
            max_restarts: spec.max_restarts,
            restart_count: state.restart_count,
            run_count: state.run_count,
            failure_count: state.failure_count,
            consecutive_failures: state.consecutive_failures,
            started_at: state.started_at,
            stopped_at: state.stopped_at,
            last_run_at: state.last_run_at,
            next_run_at: state.next_run_at,
            last_error: state.last_error.clone(),
            last_error_at: state.last_error_at,
            log_count,
        }
    }

    /// Produce a JSONL line for dashboard streaming.
    pub fn to_jsonl_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
