use crate::error::SupervisorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

fn default_restart_delay() -> u64 {
    30
}

fn default_max_restarts() -> u32 {
    5
}

/// How a job's task is driven once the job is running.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Run the task once per interval, sleeping between runs.
    Scheduled,
    /// Invoke the task once; it runs until told to stop.
    Continuous,
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobMode::Scheduled => write!(f, "scheduled"),
            JobMode::Continuous => write!(f, "continuous"),
        }
    }
}

/// Static configuration for one job. Never mutated after registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    pub mode: JobMode,
    /// Only meaningful for `Scheduled` jobs, where it must be > 0.
    #[serde(default)]
    pub interval_seconds: u64,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default = "default_restart_delay")]
    pub restart_delay_seconds: u64,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Consecutive failed scheduled runs after which the scheduling loop
    /// gives up. `None` keeps the loop going forever.
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
}

impl JobSpec {
    pub fn scheduled(id: impl Into<String>, interval_seconds: u64) -> Self {
        Self::new(id.into(), JobMode::Scheduled, interval_seconds)
    }

    pub fn continuous(id: impl Into<String>) -> Self {
        Self::new(id.into(), JobMode::Continuous, 0)
    }

    fn new(id: String, mode: JobMode, interval_seconds: u64) -> Self {
        Self {
            id,
            name: None,
            description: String::new(),
            mode,
            interval_seconds,
            auto_start: false,
            auto_restart: false,
            restart_delay_seconds: default_restart_delay(),
            max_restarts: default_max_restarts(),
            max_consecutive_failures: None,
        }
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_auto_restart(mut self, max_restarts: u32, restart_delay_seconds: u64) -> Self {
        self.auto_restart = true;
        self.max_restarts = max_restarts;
        self.restart_delay_seconds = restart_delay_seconds;
        self
    }

    pub fn with_max_consecutive_failures(mut self, limit: u32) -> Self {
        self.max_consecutive_failures = Some(limit);
        self
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_seconds)
    }

    /// Reject entries that could never run correctly.
    pub fn validate(&self) -> Result<(), SupervisorError> {
        let invalid = |reason: &str| SupervisorError::InvalidSpec {
            job: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("job id must not be empty"));
        }
        if self.mode == JobMode::Scheduled && self.interval_seconds == 0 {
            return Err(invalid("scheduled jobs need interval_seconds > 0"));
        }
        if self.max_consecutive_failures == Some(0) {
            return Err(invalid("max_consecutive_failures must be > 0 when set"));
        }
        Ok(())
    }
}
