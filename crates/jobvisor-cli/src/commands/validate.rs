use crate::dispatch;
use jobvisor_command::CommandTask;
use jobvisor_core::{Config, JobTask};

/// Register every enabled job and run each command's preflight check.
pub fn run(config: &Config) -> anyhow::Result<()> {
    let manager = dispatch::create_manager(config)?;

    let mut problems = 0;
    for job in config.enabled_jobs() {
        let task = CommandTask::from_config(job)?;
        match task.prepare() {
            Ok(()) => println!("✅ {:<20} {}", job.spec.id, task.display()),
            Err(e) => {
                problems += 1;
                println!("❌ {:<20} {:#}", job.spec.id, e);
            }
        }
    }

    let skipped = config.jobs.len() - manager.job_ids().count();
    if skipped > 0 {
        println!("{} disabled job(s) skipped", skipped);
    }

    if problems > 0 {
        anyhow::bail!("{} job(s) would fail to launch", problems);
    }
    println!("Config OK: {} job(s) registered", manager.job_ids().count());
    Ok(())
}
