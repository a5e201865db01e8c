use crate::error::SupervisorError;
use crate::job::JobSpec;
use crate::log_buffer::DEFAULT_LOG_CAPACITY;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration.
/// Loaded from ~/.config/jobvisor/jobs.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// Manager-wide timing and buffer limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// How long a stopping task may take before it is aborted.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Upper bound for `shutdown()` across all jobs.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    #[serde(default = "default_log_lines")]
    pub default_log_lines: usize,
}

fn default_grace_period_secs() -> u64 {
    5
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

fn default_log_lines() -> usize {
    100
}

fn default_enabled() -> bool {
    true
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            log_capacity: default_log_capacity(),
            default_log_lines: default_log_lines(),
        }
    }
}

impl SupervisorSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// One configured job: its spec plus the command bound to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(flatten)]
    pub spec: JobSpec,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Config {
    /// Load config from the default path, or an empty config if none exists.
    pub fn load_default() -> Result<Self, SupervisorError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::empty())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, SupervisorError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, SupervisorError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("jobvisor")
            .join("jobs.yaml")
    }

    /// Empty config with no jobs.
    pub fn empty() -> Self {
        Self {
            supervisor: SupervisorSettings::default(),
            jobs: Vec::new(),
        }
    }

    /// Find a job config by id.
    pub fn find_job(&self, id: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.spec.id == id)
    }

    /// Jobs that should be registered.
    pub fn enabled_jobs(&self) -> impl Iterator<Item = &JobConfig> {
        self.jobs.iter().filter(|j| j.enabled)
    }

    /// Apply `JOBVISOR_<ID>_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), SupervisorError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `JOBVISOR_<ID>_*` overrides from an arbitrary source.
    ///
    /// Recognized suffixes: `INTERVAL`, `AUTO_START`, `AUTO_RESTART`,
    /// `RESTART_DELAY`, `MAX_RESTARTS`, `ENABLED`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), SupervisorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for job in &mut self.jobs {
            let prefix = env_prefix(&job.spec.id);
            let get = |suffix: &str| {
                let key = format!("{}_{}", prefix, suffix);
                lookup(&key).map(|value| (key, value))
            };

            if let Some((key, value)) = get("INTERVAL") {
                job.spec.interval_seconds = parse_value(&key, &value)?;
            }
            if let Some((key, value)) = get("AUTO_START") {
                job.spec.auto_start = parse_flag(&key, &value)?;
            }
            if let Some((key, value)) = get("AUTO_RESTART") {
                job.spec.auto_restart = parse_flag(&key, &value)?;
            }
            if let Some((key, value)) = get("RESTART_DELAY") {
                job.spec.restart_delay_seconds = parse_value(&key, &value)?;
            }
            if let Some((key, value)) = get("MAX_RESTARTS") {
                job.spec.max_restarts = parse_value(&key, &value)?;
            }
            if let Some((key, value)) = get("ENABLED") {
                job.enabled = parse_flag(&key, &value)?;
            }
        }
        Ok(())
    }
}

impl JobConfig {
    /// Program and arguments, if a command is configured.
    pub fn argv(&self) -> Option<(&str, &[String])> {
        self.command
            .split_first()
            .map(|(program, args)| (program.as_str(), args))
    }
}

/// `barcode-sync` -> `JOBVISOR_BARCODE_SYNC`
pub fn env_prefix(job_id: &str) -> String {
    let id: String = job_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("JOBVISOR_{}", id)
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, SupervisorError> {
    value
        .trim()
        .parse()
        .map_err(|_| SupervisorError::Config(format!("{}: invalid value '{}'", key, value)))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, SupervisorError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(SupervisorError::Config(format!(
            "{}: expected true/false, got '{}'",
            key, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobMode;

    const SAMPLE: &str = r#"
supervisor:
  grace_period_secs: 2
jobs:
  - id: barcode_sync
    name: Barcode Sync
    mode: scheduled
    interval_seconds: 300
    auto_start: true
    auto_restart: true
    restart_delay_seconds: 60
    command: ["python", "barcode_sync.py"]
  - id: staff-sync
    mode: scheduled
    interval_seconds: 7200
    enabled: false
    command: ["python", "staff_sync.py"]
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.supervisor.grace_period(), Duration::from_secs(2));
        assert_eq!(config.supervisor.shutdown_timeout_secs, 30);
        assert_eq!(config.supervisor.log_capacity, 1000);
        assert_eq!(config.supervisor.default_log_lines, 100);

        let barcode = config.find_job("barcode_sync").unwrap();
        assert_eq!(barcode.spec.mode, JobMode::Scheduled);
        assert_eq!(barcode.spec.display_name(), "Barcode Sync");
        assert_eq!(barcode.spec.max_restarts, 5);
        let (program, args) = barcode.argv().unwrap();
        assert_eq!(program, "python");
        assert_eq!(args, ["barcode_sync.py".to_string()]);

        let enabled: Vec<_> = config.enabled_jobs().map(|j| j.spec.id.as_str()).collect();
        assert_eq!(enabled, vec!["barcode_sync"]);
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(env_prefix("barcode_sync"), "JOBVISOR_BARCODE_SYNC");
        assert_eq!(env_prefix("staff-sync"), "JOBVISOR_STAFF_SYNC");
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = [
            ("JOBVISOR_BARCODE_SYNC_INTERVAL", "60"),
            ("JOBVISOR_BARCODE_SYNC_AUTO_START", "false"),
            ("JOBVISOR_BARCODE_SYNC_MAX_RESTARTS", "2"),
            ("JOBVISOR_STAFF_SYNC_ENABLED", "TRUE"),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        let barcode = config.find_job("barcode_sync").unwrap();
        assert_eq!(barcode.spec.interval_seconds, 60);
        assert!(!barcode.spec.auto_start);
        assert_eq!(barcode.spec.max_restarts, 2);
        assert!(config.find_job("staff-sync").unwrap().enabled);
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        let err = config
            .apply_overrides(|key| (key == "JOBVISOR_BARCODE_SYNC_INTERVAL").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Config(_)));
    }

    #[test]
    fn test_empty_config() {
        let config = Config::from_yaml("{}").unwrap();
        assert!(config.jobs.is_empty());
        assert_eq!(config.supervisor, SupervisorSettings::default());
    }
}
