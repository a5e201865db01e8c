#![allow(dead_code)]

use jobvisor_core::{JobManager, JobSnapshot, JobStatus, SupervisorSettings, TaskContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn settings(grace_period_secs: u64, shutdown_timeout_secs: u64) -> SupervisorSettings {
    SupervisorSettings {
        grace_period_secs,
        shutdown_timeout_secs,
        log_capacity: 100,
        default_log_lines: 100,
    }
}

/// Polls until the job reaches `status`, panicking after ten (virtual) seconds.
pub async fn wait_for_status(manager: &JobManager, id: &str, status: JobStatus) -> JobSnapshot {
    for _ in 0..1000 {
        let snapshot = manager.get_status(id).unwrap();
        if snapshot.status == status {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "job {} never reached {}, last seen {}",
        id,
        status,
        manager.get_status(id).unwrap().status
    );
}

pub fn count(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Counts the invocation and fails immediately.
pub async fn failing(counter: Arc<AtomicUsize>) -> anyhow::Result<()> {
    counter.fetch_add(1, Ordering::SeqCst);
    anyhow::bail!("sync source unreachable")
}

/// Counts the invocation and succeeds immediately.
pub async fn succeeding(counter: Arc<AtomicUsize>) -> anyhow::Result<()> {
    counter.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

/// Counts the invocation and runs until stopped.
pub async fn cooperative(ctx: TaskContext, counter: Arc<AtomicUsize>) -> anyhow::Result<()> {
    counter.fetch_add(1, Ordering::SeqCst);
    ctx.cancelled().await;
    Ok(())
}

/// Ignores the stop signal for an hour.
pub async fn stubborn(_ctx: TaskContext) -> anyhow::Result<()> {
    tokio::time::sleep(Duration::from_secs(3600)).await;
    Ok(())
}

pub async fn panicking(_ctx: TaskContext) -> anyhow::Result<()> {
    panic!("index out of range in barcode batch");
}

pub async fn chatty(ctx: TaskContext) -> anyhow::Result<()> {
    for i in 1..=5 {
        ctx.log(format!("line {}", i));
    }
    ctx.cancelled().await;
    Ok(())
}

/// Tracks how many invocations are live at once.
pub struct Concurrency {
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Concurrency {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Counts an invocation as live until the guard drops.
    pub fn enter(self: &Arc<Self>) -> ActiveGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveGuard(Arc::clone(self))
    }
}

pub struct ActiveGuard(Arc<Concurrency>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs until stopped while recording overlap with other invocations.
pub async fn exclusive(ctx: TaskContext, tracker: Arc<Concurrency>) -> anyhow::Result<()> {
    let _live = tracker.enter();
    ctx.cancelled().await;
    Ok(())
}
