use crate::dispatch;
use chrono::Utc;
use jobvisor_core::{Config, JobEvent, JobEventKind, JobManager, JobSnapshot, ShutdownReport};
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{info, warn};

/// Run the supervisor in the foreground until Ctrl-C, then shut every job
/// down and print what happened.
pub async fn run(
    config: &Config,
    jobs: &[String],
    status_interval: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let manager = dispatch::create_manager(config)?;
    let mut events = manager.subscribe();

    manager.initialize().await;
    for id in jobs {
        if let Err(e) = manager.start(id).await {
            warn!(job = %id, "Failed to start: {}", e);
            eprintln!("Failed to start {}: {}", id, e);
        }
    }

    if !json {
        println!(
            "Supervising {} job(s). Press Ctrl-C to stop.",
            manager.job_ids().count()
        );
    }

    let mut ticker = status_interval
        .filter(|secs| *secs > 0)
        .map(|secs| tokio::time::interval(Duration::from_secs(secs)));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                if let Err(e) = res {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event, json)?,
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = tick(&mut ticker) => print_statuses(&manager, json),
        }
    }

    info!("Shutting down");
    let report = manager.shutdown().await;

    loop {
        match events.try_recv() {
            Ok(event) => print_event(&event, json)?,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    print_report(&report, json);
    if report.is_clean() {
        Ok(())
    } else {
        anyhow::bail!("shutdown was not clean")
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn print_event(event: &JobEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    let what = match &event.kind {
        JobEventKind::Started => "started".to_string(),
        JobEventKind::RunSucceeded { run } => format!("run #{} succeeded", run),
        JobEventKind::RunFailed { run, error } => format!("run #{} failed: {}", run, error),
        JobEventKind::Exited { error } => format!("exited: {}", error),
        JobEventKind::RestartScheduled { attempt, delay_secs } => {
            format!("restart #{} in {}s", attempt, delay_secs)
        }
        JobEventKind::RestartLimitReached { max } => format!("gave up after {} restarts", max),
        JobEventKind::LaunchFailed { error } => format!("launch failed: {}", error),
        JobEventKind::Stopped { forced: true } => "stopped (forced)".to_string(),
        JobEventKind::Stopped { forced: false } => "stopped".to_string(),
    };
    println!("[{}] {:<20} {}", event.at.format("%H:%M:%S"), event.job_id, what);
    Ok(())
}

fn print_statuses(manager: &JobManager, json: bool) {
    let statuses = manager.list_statuses();
    if json {
        for s in &statuses {
            println!("{}", s.to_jsonl_line());
        }
        return;
    }

    println!("--- status at {} ---", Utc::now().format("%Y-%m-%d %H:%M:%S"));
    println!(
        "{:<20} {:<16} {:<6} {:<6} {:<8} {}",
        "ID", "STATUS", "RUNS", "FAILS", "RESTARTS", "NEXT / ERROR"
    );
    for s in &statuses {
        println!(
            "{:<20} {:<16} {:<6} {:<6} {:<8} {}",
            s.id,
            s.status.to_string(),
            s.run_count,
            s.failure_count,
            s.restart_count,
            detail(s)
        );
    }
}

fn detail(s: &JobSnapshot) -> String {
    if let Some(next) = s.next_run_at {
        return format!("next run {}", next.format("%H:%M:%S"));
    }
    s.last_error.clone().unwrap_or_default()
}

fn print_report(report: &ShutdownReport, json: bool) {
    if json {
        let value = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "stopped": report.stopped,
            "forced": report.forced,
            "timed_out": report.timed_out,
        });
        println!("{}", value);
        return;
    }

    println!("Shutdown complete:");
    println!("  Stopped:   {}", report.stopped.len());
    if !report.forced.is_empty() {
        println!("  Forced:    {}", report.forced.join(", "));
    }
    if !report.timed_out.is_empty() {
        println!("  Timed out: {}", report.timed_out.join(", "));
    }
}
