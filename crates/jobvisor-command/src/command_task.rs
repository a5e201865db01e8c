use anyhow::Context;
use jobvisor_core::config::JobConfig;
use jobvisor_core::error::SupervisorError;
use jobvisor_core::log_buffer::LogLevel;
use jobvisor_core::task::{JobTask, TaskContext};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs an external program as a job task. Each invocation spawns the
/// program once; stdout and stderr are captured line by line into the
/// job's log buffer.
#[derive(Debug, Clone)]
pub struct CommandTask {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
}

impl CommandTask {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: HashMap::new(),
        }
    }

    /// Build the task bound to a configured job.
    pub fn from_config(config: &JobConfig) -> Result<Self, SupervisorError> {
        let (program, args) = config.argv().ok_or_else(|| {
            SupervisorError::Config(format!("job {} has no command", config.spec.id))
        })?;
        let mut task = Self::new(program, args.iter().cloned());
        task.working_dir = config.working_dir.as_ref().map(PathBuf::from);
        task.env = config.env.clone();
        Ok(task)
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// The command line as shown in logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn resolve_program(&self) -> Option<PathBuf> {
        let path = Path::new(&self.program);
        if path.is_absolute() {
            return path.is_file().then(|| path.to_path_buf());
        }
        if path.components().count() > 1 {
            let candidate = match &self.working_dir {
                Some(dir) => dir.join(path),
                None => path.to_path_buf(),
            };
            return candidate.is_file().then_some(candidate);
        }
        let paths = std::env::var_os("PATH")?;
        std::env::split_paths(&paths)
            .map(|dir| dir.join(&self.program))
            .find(|candidate| candidate.is_file())
    }
}

#[async_trait::async_trait]
impl JobTask for CommandTask {
    fn prepare(&self) -> anyhow::Result<()> {
        if let Some(dir) = &self.working_dir {
            if !dir.is_dir() {
                anyhow::bail!("working directory does not exist: {}", dir.display());
            }
        }
        let resolved = self
            .resolve_program()
            .with_context(|| format!("program not found: {}", self.program))?;
        debug!("Resolved {} to {}", self.program, resolved.display());
        Ok(())
    }

    async fn run(&self, ctx: TaskContext) -> anyhow::Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.display()))?;
        let pid = child.id();

        info!(job = %ctx.job_id(), pid = ?pid, "Spawned {}", self.display());
        ctx.log(format!(
            "spawned {} (pid {})",
            self.display(),
            pid.map(|p| p.to_string()).unwrap_or_else(|| "N/A".into())
        ));

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let wait = async {
            tokio::select! {
                status = child.wait() => status,
                _ = ctx.cancelled() => {
                    terminate(&mut child, pid).await;
                    child.wait().await
                }
            }
        };
        let (status, _, _) = tokio::join!(
            wait,
            pump_lines(stdout, &ctx, LogLevel::Info),
            pump_lines(stderr, &ctx, LogLevel::Warn),
        );

        let status = status.context("failed to wait for command")?;
        if status.success() {
            ctx.log("command completed successfully");
            Ok(())
        } else {
            anyhow::bail!("{} exited with {}", self.program, describe(status))
        }
    }
}

/// Ask the process to exit. The runner aborts us after the grace period,
/// at which point `kill_on_drop` sends SIGKILL.
async fn terminate(child: &mut tokio::process::Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        if send_sigterm(pid).await {
            return;
        }
    }
    if let Err(e) = child.start_kill() {
        warn!("Failed to kill child process: {}", e);
    }
}

#[cfg(unix)]
async fn send_sigterm(pid: u32) -> bool {
    debug!("Sending SIGTERM to {}", pid);
    match Command::new("kill").arg(pid.to_string()).output().await {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            warn!(
                "kill {} failed: {}",
                pid,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            false
        }
        Err(e) => {
            warn!("Failed to run kill for {}: {}", pid, e);
            false
        }
    }
}

#[cfg(not(unix))]
async fn send_sigterm(_pid: u32) -> bool {
    false
}

async fn pump_lines<R>(reader: Option<R>, ctx: &TaskContext, level: LogLevel)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => ctx.log_with_level(level, line),
            Ok(None) => break,
            Err(e) => {
                ctx.log_with_level(LogLevel::Warn, format!("output read error: {}", e));
                break;
            }
        }
    }
}

fn describe(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "termination by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobvisor_core::job::JobSpec;

    #[test]
    fn test_display() {
        let task = CommandTask::new("python", ["barcode_sync.py", "--once"]);
        assert_eq!(task.display(), "python barcode_sync.py --once");
    }

    #[test]
    fn test_from_config_requires_command() {
        let config = JobConfig {
            spec: JobSpec::scheduled("barcode_sync", 300),
            enabled: true,
            command: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
        };
        assert!(matches!(
            CommandTask::from_config(&config),
            Err(SupervisorError::Config(_))
        ));
    }

    #[test]
    fn test_prepare_rejects_missing_program() {
        let task = CommandTask::new("jobvisor-no-such-program", Vec::<String>::new());
        let err = task.prepare().unwrap_err();
        assert!(err.to_string().contains("program not found"));
    }

    #[test]
    fn test_prepare_rejects_missing_working_dir() {
        let task = CommandTask::new("sh", ["-c", "true"]).with_working_dir("/nonexistent/jobvisor");
        let err = task.prepare().unwrap_err();
        assert!(err.to_string().contains("working directory"));
    }

    #[cfg(unix)]
    #[test]
    fn test_prepare_resolves_from_path() {
        assert!(CommandTask::new("sh", ["-c", "true"]).prepare().is_ok());
        assert!(CommandTask::new("/bin/sh", ["-c", "true"]).prepare().is_ok());
    }
}
