//! Sandboxed command execution with timeouts, output capture and event monitoring.

use crate::backend::{backend_for, SandboxBackend};
use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::guard;
use crate::monitor::{SecurityEvent, SecurityEventKind, SecurityMonitor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const MAX_OUTPUT_BYTES: usize = 50 * 1024; // 50KB
const READER_DRAIN: Duration = Duration::from_secs(2);

/// Exit code reported when the process was killed at its deadline.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Resource accounting for one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Wall-clock time in milliseconds.
    pub wall_time_ms: u64,
    /// Bytes written to stdout, including truncated output.
    pub stdout_bytes: u64,
    /// Bytes written to stderr, including truncated output.
    pub stderr_bytes: u64,
    /// Configured memory ceiling.
    pub memory_limit: String,
    /// Configured CPU ceiling.
    pub cpu_limit: f64,
    /// Configured process ceiling.
    pub pids_limit: u32,
}

/// Result from a sandbox command run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxResult {
    /// Identifier of this execution.
    pub execution_id: String,
    /// Process exit code. -1 when unavailable, [`TIMEOUT_EXIT_CODE`] on timeout.
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Whether the process was killed at its deadline.
    pub timed_out: bool,
    /// Security events recorded while the process ran.
    pub security_events: Vec<SecurityEvent>,
    /// Resource accounting.
    pub resource_usage: ResourceUsage,
}

impl SandboxResult {
    /// Whether the process exited cleanly before its deadline.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Anything that can run an approved command. The session layer depends on
/// this seam rather than on a concrete sandbox.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` under `config` and report the outcome.
    async fn run(&self, command: &str, config: &SandboxConfig) -> Result<SandboxResult, SandboxError>;
}

/// Runs commands through a [`SandboxBackend`].
#[derive(Clone, Default)]
pub struct SandboxExecutor {
    backend: Option<Arc<dyn SandboxBackend>>,
}

impl SandboxExecutor {
    /// Executor that picks the backend from each run's config.
    pub fn new() -> Self {
        Self { backend: None }
    }

    /// Executor pinned to a specific backend regardless of config.
    pub fn with_backend(backend: Arc<dyn SandboxBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    fn backend(&self, config: &SandboxConfig) -> Arc<dyn SandboxBackend> {
        self.backend
            .clone()
            .unwrap_or_else(|| backend_for(config.backend))
    }

    /// Check whether the configured backend can run on this host.
    pub async fn check_available(&self, config: &SandboxConfig) -> Result<(), SandboxError> {
        self.backend(config).probe().await
    }

    /// Run a command, stopping early if `cancel` fires.
    ///
    /// The backend's cleanup always runs before this returns.
    pub async fn run_with_cancel(
        &self,
        command: &str,
        config: &SandboxConfig,
        cancel: CancellationToken,
    ) -> Result<SandboxResult, SandboxError> {
        guard::screen(command, config)?;

        let backend = self.backend(config);
        let execution_id = ulid::Ulid::new().to_string();
        let process = backend.build_command(&execution_id, command, config)?;

        tracing::info!(
            execution_id = %execution_id,
            backend = backend.name(),
            level = ?config.security_level,
            "sandbox execution started"
        );

        let outcome = execute(&execution_id, process, backend.as_ref(), config, cancel).await;
        backend.cleanup(&execution_id).await;

        match &outcome {
            Ok(result) => tracing::info!(
                execution_id = %execution_id,
                exit_code = result.exit_code,
                timed_out = result.timed_out,
                events = result.security_events.len(),
                "sandbox execution finished"
            ),
            Err(e) => tracing::warn!(execution_id = %execution_id, "sandbox execution failed: {e}"),
        }
        outcome
    }
}

#[async_trait]
impl CommandRunner for SandboxExecutor {
    async fn run(&self, command: &str, config: &SandboxConfig) -> Result<SandboxResult, SandboxError> {
        self.run_with_cancel(command, config, CancellationToken::new())
            .await
    }
}

enum Exit {
    Finished(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

async fn execute(
    execution_id: &str,
    mut process: tokio::process::Command,
    backend: &dyn SandboxBackend,
    config: &SandboxConfig,
    cancel: CancellationToken,
) -> Result<SandboxResult, SandboxError> {
    let started = Instant::now();
    process
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = process.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SandboxError::BackendUnavailable(backend.unavailable_message())
        } else {
            SandboxError::Execution(e.to_string())
        }
    })?;

    let (tx, rx) = mpsc::unbounded_channel();
    let monitor = SecurityMonitor::spawn(execution_id.to_string(), rx);
    let stdout = child.stdout.take().map(|s| tokio::spawn(capture(s, tx.clone())));
    let stderr = child.stderr.take().map(|s| tokio::spawn(capture(s, tx.clone())));
    drop(tx);

    let exit = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => Exit::Finished(status),
            Err(e) => return Err(SandboxError::Execution(e.to_string())),
        },
        _ = tokio::time::sleep(config.timeout()) => Exit::TimedOut,
        _ = cancel.cancelled() => Exit::Cancelled,
    };

    if !matches!(exit, Exit::Finished(_)) {
        if let Err(e) = child.start_kill() {
            tracing::debug!(execution_id, "kill after deadline failed: {e}");
        }
        let _ = child.wait().await;
    }

    let stdout = drain(stdout).await;
    let mut stderr = drain(stderr).await;
    let mut security_events = monitor.finish(config.monitor_grace()).await;

    let (exit_code, timed_out) = match exit {
        Exit::Finished(status) => (status.code().unwrap_or(-1), false),
        Exit::TimedOut => {
            let marker = format!("Command timed out after {}s", config.timeout_secs);
            security_events.push(SecurityEvent::new(execution_id, SecurityEventKind::Timeout, &marker));
            if !stderr.text.is_empty() {
                stderr.text.push('\n');
            }
            stderr.text.push_str(&marker);
            (TIMEOUT_EXIT_CODE, true)
        }
        Exit::Cancelled => return Err(SandboxError::Cancelled),
    };

    let duration = started.elapsed();
    Ok(SandboxResult {
        execution_id: execution_id.to_string(),
        exit_code,
        resource_usage: ResourceUsage {
            wall_time_ms: duration.as_millis() as u64,
            stdout_bytes: stdout.total_bytes,
            stderr_bytes: stderr.total_bytes,
            memory_limit: config.memory_limit.clone(),
            cpu_limit: config.cpu_limit,
            pids_limit: config.pids_limit,
        },
        stdout: stdout.text,
        stderr: stderr.text,
        duration,
        timed_out,
        security_events,
    })
}

#[derive(Default)]
struct Captured {
    text: String,
    total_bytes: u64,
}

async fn capture<R>(stream: R, lines: mpsc::UnboundedSender<String>) -> Captured
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut captured = Captured::default();
    let mut truncated = false;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                captured.total_bytes += n as u64;
                let line = String::from_utf8_lossy(&buf).into_owned();
                if captured.text.len() + line.len() <= MAX_OUTPUT_BYTES {
                    captured.text.push_str(&line);
                } else if !truncated {
                    truncated = true;
                    captured.text.push_str("\n... (truncated at 50KB)\n");
                }
                let _ = lines.send(line);
            }
        }
    }
    captured
}

async fn drain(handle: Option<JoinHandle<Captured>>) -> Captured {
    let Some(mut handle) = handle else {
        return Captured::default();
    };
    match tokio::time::timeout(READER_DRAIN, &mut handle).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(_)) => Captured::default(),
        Err(_) => {
            handle.abort();
            Captured::default()
        }
    }
}
