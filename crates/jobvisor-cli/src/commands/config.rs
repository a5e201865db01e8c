use jobvisor_core::Config;

const SAMPLE_CONFIG: &str = r#"# jobvisor configuration
# Per-job overrides: JOBVISOR_<ID>_INTERVAL, _AUTO_START, _AUTO_RESTART,
# _RESTART_DELAY, _MAX_RESTARTS, _ENABLED

supervisor:
  grace_period_secs: 5
  shutdown_timeout_secs: 30
  log_capacity: 1000
  default_log_lines: 100

jobs:
  - id: barcode_sync
    name: Barcode Sync
    description: Synchronizes barcodes from the ERP into the app database
    mode: scheduled
    interval_seconds: 300
    auto_start: true
    auto_restart: true
    restart_delay_seconds: 60
    max_restarts: 5
    command: ["python", "barcode_sync.py"]

  - id: staff_sync
    name: Staff Sync
    mode: scheduled
    interval_seconds: 7200
    max_consecutive_failures: 3
    auto_restart: true
    command: ["python", "staff_sync.py"]

  - id: change_listener
    name: Change Listener
    mode: continuous
    auto_start: false
    auto_restart: true
    restart_delay_seconds: 30
    max_restarts: 3
    enabled: false
    command: ["python", "listener.py"]
    working_dir: /opt/sync
    env:
      LOG_LEVEL: info
"#;

pub fn run(path: bool, init: bool) -> anyhow::Result<()> {
    if path {
        println!("{}", Config::default_path().display());
        return Ok(());
    }

    if init {
        let config_path = Config::default_path();
        if config_path.exists() {
            println!("Config already exists at: {}", config_path.display());
            println!("Remove it first if you want to reinitialize.");
            return Ok(());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_path, SAMPLE_CONFIG)?;
        println!("Sample config written to: {}", config_path.display());
        return Ok(());
    }

    // Default: show current config path and status
    let config_path = Config::default_path();
    println!("Config path: {}", config_path.display());
    if config_path.exists() {
        let config = Config::load_from(&config_path)?;
        println!("Jobs:        {}", config.jobs.len());
        for j in &config.jobs {
            let state = if j.enabled { "" } else { " [disabled]" };
            println!("  - {} ({}){}", j.spec.id, j.spec.mode, state);
        }
    } else {
        println!("Status:      not found");
        println!("Run `jobvisor config --init` to create one.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config_is_valid() {
        let config = Config::from_yaml(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.jobs.len(), 3);
        for job in &config.jobs {
            job.spec.validate().unwrap();
            assert!(job.argv().is_some());
        }
        assert_eq!(config.enabled_jobs().count(), 2);
    }
}
