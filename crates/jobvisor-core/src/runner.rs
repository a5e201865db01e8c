//! Execution of a single job: launch, supervision loop, auto-restart and stop.
//!
//! Each active job owns exactly one supervision task. That task drives the
//! job's mode (scheduled loop or single continuous invocation), decides on
//! auto-restart after an unexpected exit, and waits out the restart delay.
//! Control operations (`start`, `stop`, `restart`) take the runner's control
//! lock, so at most one supervision task exists per job at any time.

use crate::config::SupervisorSettings;
use crate::error::{JobFailure, SupervisorError};
use crate::events::{JobEvent, JobEventKind};
use crate::job::{JobMode, JobSpec};
use crate::log_buffer::{LogBuffer, LogLevel, LogLine};
use crate::state::{JobSnapshot, JobState, JobStatus};
use crate::task::{JobTask, TaskContext};
use chrono::Utc;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How a `stop()` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    AlreadyStopped,
    /// The task honored the stop signal within the grace period.
    Graceful,
    /// The grace period ran out and the execution context was aborted.
    Forced,
}

pub struct JobRunner {
    shared: Arc<Shared>,
    grace_period: Duration,
    control: tokio::sync::Mutex<Option<Execution>>,
    /// Set once shutdown begins; no execution is launched afterwards.
    closed: AtomicBool,
    /// Cuts any in-progress grace period short.
    force: CancellationToken,
}

/// Where a supervision task picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Launch {
    Now,
    AfterRestartDelay,
}

struct Execution {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    spec: JobSpec,
    job_id: Arc<str>,
    task: Arc<dyn JobTask>,
    logs: Arc<LogBuffer>,
    state: Mutex<JobState>,
    events: broadcast::Sender<JobEvent>,
    /// True while a task invocation is alive.
    busy: Arc<watch::Sender<bool>>,
}

impl JobRunner {
    pub fn new(
        spec: JobSpec,
        task: Arc<dyn JobTask>,
        settings: &SupervisorSettings,
        events: broadcast::Sender<JobEvent>,
    ) -> Self {
        let job_id: Arc<str> = Arc::from(spec.id.as_str());
        Self {
            shared: Arc::new(Shared {
                spec,
                job_id,
                task,
                logs: Arc::new(LogBuffer::new(settings.log_capacity)),
                state: Mutex::new(JobState::default()),
                events,
                busy: Arc::new(watch::channel(false).0),
            }),
            grace_period: settings.grace_period(),
            control: tokio::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
            force: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.job_id
    }

    pub fn spec(&self) -> &JobSpec {
        &self.shared.spec
    }

    pub fn status(&self) -> JobStatus {
        self.shared.state().status
    }

    /// Never waits on a control operation in progress.
    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.shared.state().clone();
        JobSnapshot::capture(&self.shared.spec, &state, self.shared.logs.len())
    }

    pub fn logs(&self, lines: usize) -> Vec<LogLine> {
        self.shared.logs.tail(lines)
    }

    /// Refuse every later `start` and `restart`. Pending auto-restarts are
    /// cancelled by the stop that follows.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Skip what is left of the grace period in every stop, current or
    /// future, and reclaim the execution right away.
    pub(crate) fn force(&self) {
        self.force.cancel();
    }

    /// Note a stop that could not be confirmed. The status is left alone
    /// since whoever holds the control lock still owns the execution.
    pub(crate) fn abandon(&self, failure: &JobFailure) {
        self.shared.update(|s| s.record_error(failure));
        self.shared.log(LogLevel::Error, failure.to_string());
    }

    /// No-op while the job is already starting, running or waiting to
    /// restart. Returns once the job has entered `Starting`.
    pub async fn start(&self) -> Result<JobSnapshot, SupervisorError> {
        let mut slot = self.control.lock().await;
        self.start_locked(&mut slot).await
    }

    /// Idempotent. A stop that has to force the job waits at most three
    /// grace periods.
    pub async fn stop(&self) -> StopOutcome {
        let mut slot = self.control.lock().await;
        self.stop_locked(&mut slot).await
    }

    /// Stop then start under one hold of the control lock.
    pub async fn restart(&self) -> Result<JobSnapshot, SupervisorError> {
        let mut slot = self.control.lock().await;
        self.stop_locked(&mut slot).await;
        self.start_locked(&mut slot).await
    }

    async fn start_locked(
        &self,
        slot: &mut Option<Execution>,
    ) -> Result<JobSnapshot, SupervisorError> {
        if self.closed.load(Ordering::SeqCst) {
            debug!(job = %self.id(), "Start refused, shutting down");
            return Err(SupervisorError::ShuttingDown(self.id().to_string()));
        }

        let status = self.status();
        if status.is_active() {
            debug!(job = %self.id(), %status, "Start ignored, job already active");
            return Ok(self.snapshot());
        }

        // A job that settled in Failed leaves a finished supervision task behind.
        if let Some(previous) = slot.take() {
            previous.token.cancel();
            let _ = previous.handle.await;
        }

        self.shared.update(JobState::mark_starting);
        if let Err(reason) = self.shared.preflight() {
            let failure = JobFailure::LaunchFailure(reason.clone());
            if self.shared.settle_failure(&failure, None).is_some() {
                self.launch(slot, Launch::AfterRestartDelay);
            }
            return Err(SupervisorError::LaunchFailure {
                job: self.id().to_string(),
                reason,
            });
        }

        self.launch(slot, Launch::Now);
        info!(job = %self.id(), mode = %self.spec().mode, "Job starting");
        Ok(self.snapshot())
    }

    fn launch(&self, slot: &mut Option<Execution>, entry: Launch) {
        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.shared).supervise(token.clone(), entry));
        *slot = Some(Execution { token, handle });
    }

    async fn stop_locked(&self, slot: &mut Option<Execution>) -> StopOutcome {
        let Some(execution) = slot.take() else {
            return StopOutcome::AlreadyStopped;
        };

        let settled = {
            let mut state = self.shared.state();
            let settled = state.status.is_settled();
            if !settled {
                state.mark_stopping();
            }
            settled
        };
        let Execution { token, handle } = execution;
        token.cancel();
        // Dropping this stop future (e.g. an expired shutdown budget) must
        // not leave the supervision task behind.
        let mut handle = AbortOnDrop(handle);

        if settled {
            let _ = (&mut handle.0).await;
            return StopOutcome::AlreadyStopped;
        }

        let exited = tokio::select! {
            biased;
            res = tokio::time::timeout(self.grace_period, &mut handle.0) => res.is_ok(),
            _ = self.force.cancelled() => false,
        };
        let outcome = if exited {
            StopOutcome::Graceful
        } else {
            handle.0.abort();
            if tokio::time::timeout(self.grace_period, &mut handle.0).await.is_err() {
                error!(job = %self.id(), "Aborted job did not exit, detaching it");
            }
            // The invocation is reclaimed one hop after its supervision task.
            if !self.shared.wait_idle(self.grace_period).await {
                error!(job = %self.id(), "Aborted invocation still alive");
            }
            StopOutcome::Forced
        };

        let forced = outcome == StopOutcome::Forced;
        self.shared.update(|s| {
            s.mark_stopped();
            if forced {
                s.record_error(&JobFailure::ShutdownTimeout {
                    grace: self.grace_period,
                });
            }
        });

        if forced {
            warn!(job = %self.id(), grace = ?self.grace_period, "Job ignored stop signal, forcibly terminated");
            self.shared.log(
                LogLevel::Warn,
                format!(
                    "forced termination: task did not stop within {:?}",
                    self.grace_period
                ),
            );
        } else {
            info!(job = %self.id(), "Job stopped");
            self.shared.log(LogLevel::Info, "job stopped");
        }
        self.shared.emit(None, JobEventKind::Stopped { forced });
        outcome
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update<T>(&self, f: impl FnOnce(&mut JobState) -> T) -> T {
        f(&mut self.state())
    }

    /// Applies `f` unless a stop has been requested meanwhile.
    fn transition(&self, f: impl FnOnce(&mut JobState)) -> bool {
        let mut state = self.state();
        if state.requested_stop {
            return false;
        }
        f(&mut state);
        true
    }

    fn log(&self, level: LogLevel, line: impl Into<String>) {
        self.logs.append_with_level(level, line);
    }

    fn emit(&self, run_id: Option<Uuid>, kind: JobEventKind) {
        // No subscribers is fine.
        let _ = self.events.send(JobEvent::new(&self.job_id, run_id, kind));
    }

    fn context(&self, run_id: Uuid, token: &CancellationToken) -> TaskContext {
        TaskContext::new(
            Arc::clone(&self.job_id),
            run_id,
            token.clone(),
            Arc::clone(&self.logs),
        )
    }

    /// Launch check; the error is the launch failure reason.
    fn preflight(&self) -> Result<(), String> {
        self.task.prepare().map_err(|e| format!("{:#}", e))
    }

    /// Waits until no task invocation is alive. False on timeout.
    async fn wait_idle(&self, limit: Duration) -> bool {
        let mut busy = self.busy.subscribe();
        let idle = tokio::time::timeout(limit, busy.wait_for(|busy| !*busy))
            .await
            .is_ok();
        idle
    }

    /// Records an unrequested exit or launch failure and applies the restart
    /// policy. Returns the restart attempt when one has been scheduled.
    fn settle_failure(&self, failure: &JobFailure, run_id: Option<Uuid>) -> Option<u32> {
        let attempt = {
            let mut state = self.state();
            if state.requested_stop {
                return None;
            }
            state.mark_failed(failure);
            if self.spec.auto_restart && state.restart_count < self.spec.max_restarts {
                state.restart_count += 1;
                state.status = JobStatus::RestartPending;
                Some(state.restart_count)
            } else {
                None
            }
        };

        match failure {
            JobFailure::LaunchFailure(reason) => {
                error!(job = %self.job_id, "Job failed to launch: {}", reason);
                self.log(LogLevel::Error, failure.to_string());
                self.emit(
                    run_id,
                    JobEventKind::LaunchFailed {
                        error: reason.clone(),
                    },
                );
            }
            _ => {
                error!(job = %self.job_id, run_id = ?run_id, "Job exited: {}", failure);
                self.log(LogLevel::Error, format!("job exited: {}", failure));
                self.emit(
                    run_id,
                    JobEventKind::Exited {
                        error: failure.to_string(),
                    },
                );
            }
        }

        match attempt {
            Some(attempt) => {
                info!(
                    job = %self.job_id,
                    attempt,
                    max = self.spec.max_restarts,
                    delay_secs = self.spec.restart_delay_seconds,
                    "Scheduling auto-restart"
                );
                self.log(
                    LogLevel::Warn,
                    format!(
                        "auto-restart {}/{} in {}s",
                        attempt, self.spec.max_restarts, self.spec.restart_delay_seconds
                    ),
                );
                self.emit(
                    run_id,
                    JobEventKind::RestartScheduled {
                        attempt,
                        delay_secs: self.spec.restart_delay_seconds,
                    },
                );
            }
            None if self.spec.auto_restart => {
                let limit = JobFailure::RestartLimitExceeded {
                    max: self.spec.max_restarts,
                };
                warn!(job = %self.job_id, "{}, leaving job failed", limit);
                self.log(LogLevel::Error, limit.to_string());
                self.emit(
                    run_id,
                    JobEventKind::RestartLimitReached {
                        max: self.spec.max_restarts,
                    },
                );
            }
            None => {}
        }
        attempt
    }

    async fn supervise(self: Arc<Self>, token: CancellationToken, mut entry: Launch) {
        loop {
            if entry == Launch::AfterRestartDelay {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(self.spec.restart_delay()) => {}
                }
                if !self.transition(JobState::mark_restarting) {
                    return;
                }
                if let Err(reason) = self.preflight() {
                    let failure = JobFailure::LaunchFailure(reason);
                    if self.settle_failure(&failure, None).is_none() {
                        return;
                    }
                    continue;
                }
            }
            entry = Launch::AfterRestartDelay;

            let run_id = Uuid::new_v4();
            if !self.transition(JobState::mark_running) {
                return;
            }
            info!(job = %self.job_id, %run_id, "Job running");
            self.log(
                LogLevel::Info,
                format!("job started ({} mode, run id {})", self.spec.mode, run_id),
            );
            self.emit(Some(run_id), JobEventKind::Started);

            let exit = match self.spec.mode {
                JobMode::Scheduled => self.run_scheduled(run_id, &token).await,
                JobMode::Continuous => self.run_continuous(run_id, &token).await,
            };
            // None: the mode loop saw the stop signal.
            let Some(failure) = exit else {
                return;
            };
            if self.settle_failure(&failure, Some(run_id)).is_none() {
                return;
            }
        }
    }

    async fn run_scheduled(&self, run_id: Uuid, token: &CancellationToken) -> Option<JobFailure> {
        let interval = self.spec.interval();
        loop {
            if token.is_cancelled() {
                return None;
            }

            let run = self.update(JobState::mark_run_started);
            self.log(LogLevel::Info, format!("starting scheduled run #{}", run));

            match self.invoke(self.context(run_id, token)).await {
                Ok(()) => {
                    self.update(JobState::mark_run_succeeded);
                    debug!(job = %self.job_id, run, "Scheduled run completed");
                    self.log(LogLevel::Info, format!("run #{} completed", run));
                    self.emit(Some(run_id), JobEventKind::RunSucceeded { run });
                }
                Err(failure) if token.is_cancelled() => {
                    self.log(
                        LogLevel::Warn,
                        format!("run #{} interrupted by stop: {}", run, failure),
                    );
                    return None;
                }
                Err(failure) => {
                    let consecutive = self.update(|s| {
                        s.mark_run_failed(&failure);
                        s.consecutive_failures
                    });
                    warn!(job = %self.job_id, run, consecutive, "Scheduled run failed: {}", failure);
                    self.log(LogLevel::Error, format!("run #{} failed: {}", run, failure));
                    self.emit(
                        Some(run_id),
                        JobEventKind::RunFailed {
                            run,
                            error: failure.to_string(),
                        },
                    );
                    if let Some(limit) = self.spec.max_consecutive_failures {
                        if consecutive >= limit {
                            return Some(JobFailure::TooManyFailures { count: consecutive });
                        }
                    }
                }
            }

            let next_run_at = chrono::Duration::from_std(interval)
                .ok()
                .map(|delta| Utc::now() + delta);
            self.update(|s| s.next_run_at = next_run_at);

            tokio::select! {
                _ = token.cancelled() => return None,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn run_continuous(&self, run_id: Uuid, token: &CancellationToken) -> Option<JobFailure> {
        self.update(JobState::mark_run_started);
        let result = self.invoke(self.context(run_id, token)).await;

        if token.is_cancelled() {
            if let Err(failure) = result {
                self.log(LogLevel::Warn, format!("task returned after stop: {}", failure));
            }
            return None;
        }

        match result {
            Ok(()) => Some(JobFailure::ExitedUnexpectedly),
            Err(failure) => {
                self.update(|s| s.mark_run_failed(&failure));
                Some(failure)
            }
        }
    }

    /// Runs one task invocation in its own tokio task so panics stay contained.
    async fn invoke(&self, ctx: TaskContext) -> Result<(), JobFailure> {
        let task = Arc::clone(&self.task);
        let busy = BusyGuard::enter(&self.busy);
        let mut guard = AbortOnDrop(tokio::spawn(async move {
            let _busy = busy;
            task.run(ctx).await
        }));

        match (&mut guard.0).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(JobFailure::TaskFailure(format!("{:#}", e))),
            Err(join_err) if join_err.is_panic() => {
                Err(JobFailure::Panicked(panic_message(join_err.into_panic())))
            }
            Err(join_err) => Err(JobFailure::TaskFailure(join_err.to_string())),
        }
    }
}

/// Aborts the wrapped task when dropped, so aborting the supervision task
/// also reclaims the invocation it is waiting on.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Marks a task invocation alive until dropped, however it ends.
struct BusyGuard(Arc<watch::Sender<bool>>);

impl BusyGuard {
    fn enter(busy: &Arc<watch::Sender<bool>>) -> Self {
        busy.send_replace(true);
        Self(Arc::clone(busy))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
