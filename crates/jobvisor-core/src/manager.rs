//! Registry and control plane for all configured jobs.

use crate::config::SupervisorSettings;
use crate::error::{JobFailure, SupervisorError};
use crate::events::JobEvent;
use crate::job::JobSpec;
use crate::log_buffer::LogLine;
use crate::runner::{JobRunner, StopOutcome};
use crate::state::JobSnapshot;
use crate::task::JobTask;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What happened to each job during `shutdown()`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: Vec<String>,
    pub forced: Vec<String>,
    /// Jobs still unsettled when the total shutdown budget ran out.
    pub timed_out: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.forced.is_empty() && self.timed_out.is_empty()
    }
}

/// Owns one [`JobRunner`] per registered job.
///
/// Jobs are registered through `&mut self` before the manager is shared,
/// after which the registry is read-only and lookups take no lock.
pub struct JobManager {
    settings: SupervisorSettings,
    runners: Vec<Arc<JobRunner>>,
    index: HashMap<String, usize>,
    events: broadcast::Sender<JobEvent>,
}

impl JobManager {
    pub fn new(settings: SupervisorSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            settings,
            runners: Vec::new(),
            index: HashMap::new(),
            events,
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Register a job. Malformed specs and duplicate ids are rejected here,
    /// never at run time.
    pub fn register(
        &mut self,
        spec: JobSpec,
        task: Arc<dyn JobTask>,
    ) -> Result<(), SupervisorError> {
        spec.validate()?;
        if self.index.contains_key(&spec.id) {
            return Err(SupervisorError::DuplicateJob(spec.id));
        }

        info!(job = %spec.id, mode = %spec.mode, "Registering job");
        self.index.insert(spec.id.clone(), self.runners.len());
        self.runners.push(Arc::new(JobRunner::new(
            spec,
            task,
            &self.settings,
            self.events.clone(),
        )));
        Ok(())
    }

    /// Start every job flagged `auto_start`. Launch failures are logged and
    /// left visible in the job's status; they do not stop other jobs.
    pub async fn initialize(&self) {
        for runner in self.runners.iter().filter(|r| r.spec().auto_start) {
            if let Err(e) = runner.start().await {
                error!(job = %runner.id(), "Auto-start failed: {}", e);
            }
        }
        info!(jobs = self.runners.len(), "Job manager initialized");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub fn job_ids(&self) -> impl Iterator<Item = &str> {
        self.runners.iter().map(|r| r.id())
    }

    fn runner(&self, id: &str) -> Result<&Arc<JobRunner>, SupervisorError> {
        self.index
            .get(id)
            .map(|&i| &self.runners[i])
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))
    }

    /// Snapshot of every job in registration order.
    pub fn list_statuses(&self) -> Vec<JobSnapshot> {
        self.runners.iter().map(|r| r.snapshot()).collect()
    }

    pub fn get_status(&self, id: &str) -> Result<JobSnapshot, SupervisorError> {
        Ok(self.runner(id)?.snapshot())
    }

    /// Last `lines` log lines, or `default_log_lines` when unspecified.
    pub fn get_logs(&self, id: &str, lines: Option<usize>) -> Result<Vec<LogLine>, SupervisorError> {
        let lines = lines.unwrap_or(self.settings.default_log_lines);
        Ok(self.runner(id)?.logs(lines))
    }

    pub async fn start(&self, id: &str) -> Result<JobSnapshot, SupervisorError> {
        self.runner(id)?.start().await
    }

    pub async fn stop(&self, id: &str) -> Result<JobSnapshot, SupervisorError> {
        let runner = self.runner(id)?;
        runner.stop().await;
        Ok(runner.snapshot())
    }

    pub async fn restart(&self, id: &str) -> Result<JobSnapshot, SupervisorError> {
        self.runner(id)?.restart().await
    }

    /// Stop every job concurrently. No job can be started once this begins.
    ///
    /// Jobs still stopping after `shutdown_timeout` are forced without
    /// waiting out their grace period and reported as timed out. The call
    /// returns within `shutdown_timeout` plus one grace period.
    pub async fn shutdown(&self) -> ShutdownReport {
        info!(jobs = self.runners.len(), "Shutting down job manager");
        for runner in &self.runners {
            runner.close();
        }

        let mut pending: JoinSet<(usize, StopOutcome)> = JoinSet::new();
        for (i, runner) in self.runners.iter().enumerate() {
            let runner = Arc::clone(runner);
            pending.spawn(async move { (i, runner.stop().await) });
        }

        let mut report = ShutdownReport::default();
        let mut settled = vec![false; self.runners.len()];
        let mut expired = false;
        let deadline = tokio::time::sleep(self.settings.shutdown_timeout());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = pending.join_next() => match joined {
                    Some(Ok((i, outcome))) => {
                        settled[i] = true;
                        let id = self.runners[i].id().to_string();
                        match outcome {
                            _ if expired => report.timed_out.push(id),
                            StopOutcome::Forced => report.forced.push(id),
                            _ => report.stopped.push(id),
                        }
                    }
                    Some(Err(e)) => error!("Stop task failed during shutdown: {}", e),
                    None => break,
                },
                _ = &mut deadline => {
                    if expired {
                        pending.abort_all();
                        break;
                    }
                    expired = true;
                    warn!("Shutdown timeout reached, forcing remaining jobs");
                    for (runner, _) in self.runners.iter().zip(&settled).filter(|(_, done)| !**done) {
                        runner.force();
                    }
                    let reap = tokio::time::Instant::now() + self.settings.grace_period();
                    deadline.as_mut().reset(reap);
                }
            }
        }

        let failure = JobFailure::ShutdownTimeout {
            grace: self.settings.shutdown_timeout(),
        };
        for (runner, _) in self.runners.iter().zip(&settled).filter(|(_, done)| !**done) {
            warn!(job = %runner.id(), "{}", failure);
            runner.abandon(&failure);
            report.timed_out.push(runner.id().to_string());
        }

        if report.is_clean() {
            info!(stopped = report.stopped.len(), "All jobs stopped");
        } else {
            warn!(
                stopped = report.stopped.len(),
                forced = report.forced.len(),
                timed_out = report.timed_out.len(),
                "Shutdown finished with forced terminations"
            );
        }
        report
    }
}
