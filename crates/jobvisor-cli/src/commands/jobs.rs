use jobvisor_core::Config;

pub fn run(config: &Config, json: bool) -> anyhow::Result<()> {
    if config.jobs.is_empty() {
        println!("No jobs configured.");
        println!("Run `jobvisor config --init` to create a sample config.");
        return Ok(());
    }

    if json {
        let entries: Vec<serde_json::Value> = config
            .jobs
            .iter()
            .map(|j| {
                serde_json::json!({
                    "id": j.spec.id,
                    "name": j.spec.display_name(),
                    "mode": j.spec.mode,
                    "interval_seconds": j.spec.interval_seconds,
                    "auto_start": j.spec.auto_start,
                    "auto_restart": j.spec.auto_restart,
                    "max_restarts": j.spec.max_restarts,
                    "enabled": j.enabled,
                    "command": j.command,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        println!(
            "{:<20} {:<11} {:<9} {:<6} {:<8} {}",
            "ID", "MODE", "INTERVAL", "AUTO", "ENABLED", "COMMAND"
        );
        println!("{}", "-".repeat(80));
        for j in &config.jobs {
            let interval = match j.spec.mode {
                jobvisor_core::JobMode::Scheduled => format!("{}s", j.spec.interval_seconds),
                jobvisor_core::JobMode::Continuous => "-".to_string(),
            };
            println!(
                "{:<20} {:<11} {:<9} {:<6} {:<8} {}",
                j.spec.id,
                j.spec.mode.to_string(),
                interval,
                if j.spec.auto_start { "yes" } else { "no" },
                if j.enabled { "yes" } else { "no" },
                j.command.join(" "),
            );
        }
    }

    Ok(())
}
