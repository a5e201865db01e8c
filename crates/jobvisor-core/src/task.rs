use crate::log_buffer::{LogBuffer, LogLevel};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// The unit of work a job runs. The supervisor never looks inside it.
///
/// `run` must return once `ctx.cancelled()` fires. Tasks that ignore the
/// signal are aborted after the grace period, at their next `.await`.
#[async_trait::async_trait]
pub trait JobTask: Send + Sync {
    /// Checked before an execution context is created. An error here is a
    /// launch failure and is not retried automatically.
    fn prepare(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// One invocation: a single pass for scheduled jobs, the whole
    /// lifetime for continuous ones.
    async fn run(&self, ctx: TaskContext) -> anyhow::Result<()>;
}

/// Handed to every task invocation: stop signal plus the job's log sink.
#[derive(Clone)]
pub struct TaskContext {
    job_id: Arc<str>,
    run_id: Uuid,
    cancellation_token: CancellationToken,
    logs: Arc<LogBuffer>,
}

impl TaskContext {
    pub(crate) fn new(
        job_id: Arc<str>,
        run_id: Uuid,
        cancellation_token: CancellationToken,
        logs: Arc<LogBuffer>,
    ) -> Self {
        Self {
            job_id,
            run_id,
            cancellation_token,
            logs,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Identifies the current execution context; changes on every start
    /// and auto-restart.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Resolves once a stop has been requested.
    pub async fn cancelled(&self) {
        self.cancellation_token.cancelled().await
    }

    pub fn log(&self, line: impl Into<String>) {
        self.log_with_level(LogLevel::Info, line);
    }

    pub fn log_with_level(&self, level: LogLevel, line: impl Into<String>) {
        let line = line.into();
        debug!(job = %self.job_id, "{}", line);
        self.logs.append_with_level(level, line);
    }
}

/// Adapts an async closure into a [`JobTask`].
pub struct FnTask<F> {
    f: F,
}

#[async_trait::async_trait]
impl<F, Fut> JobTask for FnTask<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: TaskContext) -> anyhow::Result<()> {
        (self.f)(ctx).await
    }
}

pub fn task_fn<F, Fut>(f: F) -> Arc<dyn JobTask>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnTask { f })
}
