//! Supervision of a single agent process.
//!
//! The prompt is piped on stdin, stdout/stderr are captured in full, and the
//! child is raced against the wall-clock timeout and the run's interrupt
//! signal. Each child runs in its own process group so that termination
//! reaches any helpers the agent spawned.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::{Invocation, ToolId};
use crate::config::SandboxSettings;
use crate::context::RunContext;
use crate::errors::ToolError;

/// Exit code reported for a timed-out invocation.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// How long to wait for the output readers once the child is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Raw result of one process run.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ProcessOutcome {
    /// Stdout followed by stderr, as the agent's full visible output.
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Wrap `invocation` so it runs inside a container with `dir` mounted at `/workspace`.
///
/// The agent command and its arguments pass through unchanged.
pub fn sandbox_wrap(invocation: &Invocation, sandbox: &SandboxSettings, dir: &Path) -> Invocation {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "-i".to_string(),
        "-v".to_string(),
        format!("{}:/workspace", dir.display()),
        "-w".to_string(),
        "/workspace".to_string(),
        sandbox.image.clone(),
        invocation.program.clone(),
    ];
    args.extend(invocation.args.iter().cloned());
    Invocation {
        program: sandbox.runtime.clone(),
        args,
    }
}

/// Run `invocation` in `dir`, feeding `prompt` on stdin.
///
/// A timeout kills the process group and yields an outcome with
/// [`TIMEOUT_EXIT_CODE`]. An interrupt sends SIGTERM, waits the run's kill
/// grace, then force-kills and returns [`ToolError::Interrupted`].
pub async fn run_process(
    ctx: &RunContext,
    tool: ToolId,
    invocation: &Invocation,
    prompt: &str,
    dir: &Path,
    timeout: Duration,
) -> Result<ProcessOutcome, ToolError> {
    if ctx.is_interrupted() {
        return Err(ToolError::Interrupted { tool });
    }

    tracing::debug!(tool = %tool, command = %invocation.display(), dir = %dir.display(), "spawning agent");

    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|source| ToolError::SpawnFailed { tool, source })?;

    let heartbeat = ctx.heartbeat(format!("{tool} (pid {})", child.id().unwrap_or(0)));

    let stdin_task = child.stdin.take().map(|mut stdin| {
        let prompt = prompt.to_owned();
        tokio::spawn(async move {
            let result = async {
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.shutdown().await
            }
            .await;
            match result {
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        })
    });
    let stdout_task = child.stdout.take().map(spawn_reader);
    let stderr_task = child.stderr.take().map(spawn_reader);

    let waited = tokio::select! {
        status = child.wait() => Waited::Exited(status),
        _ = tokio::time::sleep(timeout) => Waited::TimedOut,
        _ = ctx.interrupted() => Waited::Interrupted,
    };

    let timed_out = matches!(waited, Waited::TimedOut);
    let exit_code = match waited {
        Waited::Exited(Ok(status)) => status.code().unwrap_or(-1),
        Waited::Exited(Err(e)) => {
            tracing::warn!(tool = %tool, error = %e, "failed to wait on agent process");
            -1
        }
        Waited::TimedOut => {
            tracing::warn!(tool = %tool, timeout_secs = timeout.as_secs(), "agent timed out, killing");
            force_kill(&mut child).await;
            TIMEOUT_EXIT_CODE
        }
        Waited::Interrupted => {
            terminate_gracefully(&mut child, ctx.kill_grace()).await;
            heartbeat.stop();
            if let Some(task) = stdin_task {
                task.abort();
            }
            return Err(ToolError::Interrupted { tool });
        }
    };
    heartbeat.stop();

    if let Some(task) = stdin_task
        && let Ok(Ok(Err(source))) = tokio::time::timeout(DRAIN_TIMEOUT, task).await
    {
        return Err(ToolError::StdinFailed { tool, source });
    }

    let stdout = drain(stdout_task).await;
    let stderr = drain(stderr_task).await;
    let duration = started.elapsed();

    tracing::debug!(
        tool = %tool,
        exit_code,
        duration_ms = duration.as_millis() as u64,
        "agent finished"
    );

    Ok(ProcessOutcome {
        stdout,
        stderr,
        exit_code,
        timed_out,
        duration,
    })
}

enum Waited {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Interrupted,
}

fn spawn_reader<R>(mut reader: R) -> JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    })
}

async fn drain(task: Option<JoinHandle<String>>) -> String {
    let Some(task) = task else {
        return String::new();
    };
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_TIMEOUT, task).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            // A grandchild still holds the pipe open
            abort.abort();
            String::new()
        }
    }
}

/// SIGTERM the process group, wait up to `grace`, then SIGKILL.
async fn terminate_gracefully(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        tracing::info!(pid, grace_ms = grace.as_millis() as u64, "sending SIGTERM to agent");
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM);
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
        tracing::warn!(pid, "agent ignored SIGTERM, forcing kill");
    }
    #[cfg(not(unix))]
    let _ = grace;

    force_kill(child).await;
}

async fn force_kill(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    let _ = child.kill().await;
}
