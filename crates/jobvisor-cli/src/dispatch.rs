use jobvisor_command::CommandTask;
use jobvisor_core::config::Config;
use jobvisor_core::error::SupervisorError;
use jobvisor_core::JobManager;
use std::sync::Arc;
use tracing::info;

/// Build a job manager with a command task bound to every enabled job.
pub fn create_manager(config: &Config) -> Result<JobManager, SupervisorError> {
    let mut manager = JobManager::new(config.supervisor.clone());
    for job in config.enabled_jobs() {
        let task = CommandTask::from_config(job)?;
        info!(job = %job.spec.id, command = %task.display(), "Binding command task");
        manager.register(job.spec.clone(), Arc::new(task))?;
    }
    Ok(manager)
}
