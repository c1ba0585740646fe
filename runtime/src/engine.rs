//! Execution engine.
//!
//! Runs one [`Invocation`] as a child process and supervises it until it
//! reaches a terminal state:
//!
//! ```text
//! Pending -> Running -> { Succeeded | Failed | Cancelled }
//! Pending -> LaunchFailed
//! ```
//!
//! Both output streams are drained by their own tasks while the supervisor
//! waits for exit, so a chatty child never blocks on a full pipe. Lines are
//! forwarded to the caller as they arrive and collected into the outcome's
//! transcript.
//!
//! Cancellation sends a termination request to the child's process group,
//! waits for the grace period, then kills the group. Once cancellation has
//! been requested the outcome is `Cancelled` whatever the exit code.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::launcher::Invocation;
use crate::transcript::{OutputLine, OutputStream, Transcript};

/// Default time a child gets to exit after a termination request.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// How long to keep draining buffered output after the child exits.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Terminal status of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    /// Exited unsuccessfully. `exit_code` is `None` when the child was
    /// ended by a signal.
    Failed { exit_code: Option<i32> },
    Cancelled,
    /// The child could not be started.
    LaunchFailed { reason: String },
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Succeeded)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed { exit_code: Some(code) } => write!(f, "failed (exit code {code})"),
            RunStatus::Failed { exit_code: None } => write!(f, "failed (terminated by signal)"),
            RunStatus::Cancelled => write!(f, "cancelled"),
            RunStatus::LaunchFailed { reason } => write!(f, "launch failed: {reason}"),
        }
    }
}

/// Terminal record of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub plugin: String,
    pub status: RunStatus,
    /// Exists even when the run failed.
    pub output_dir: PathBuf,
    pub transcript: Transcript,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Supervises child processes.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    grace_period: Duration,
    drain_timeout: Duration,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

impl ExecutionEngine {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            grace_period,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Run `invocation` to completion.
    ///
    /// `on_line` sees every output line in arrival order, before it is
    /// appended to the transcript. Cancelling `cancel` terminates the child.
    pub async fn run<F>(
        &self,
        invocation: &Invocation,
        mut on_line: F,
        cancel: &CancellationToken,
    ) -> RunOutcome
    where
        F: FnMut(&OutputLine) + Send,
    {
        let started_at = Local::now();
        let finish = |status: RunStatus, transcript: Transcript| RunOutcome {
            plugin: invocation.plugin.clone(),
            status,
            output_dir: invocation.output_dir.clone(),
            transcript,
            started_at,
            finished_at: Local::now(),
        };

        if cancel.is_cancelled() {
            tracing::info!(plugin = %invocation.plugin, "run cancelled before launch");
            return finish(RunStatus::Cancelled, Transcript::new());
        }

        let mut child = match spawn(invocation) {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("{}: {e}", invocation.program.display());
                tracing::warn!(plugin = %invocation.plugin, %reason, "launch failed");
                return finish(RunStatus::LaunchFailed { reason }, Transcript::new());
            }
        };
        let pid = child.id();
        tracing::info!(plugin = %invocation.plugin, pid, "run started");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(stdout, OutputStream::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(stderr, OutputStream::Stderr, tx.clone())));
        }
        drop(tx);

        let mut transcript = Transcript::new();
        let mut cancel_requested = false;
        let mut kill_deadline: Option<Instant> = None;

        let exit = loop {
            tokio::select! {
                Some(line) = rx.recv() => {
                    on_line(&line);
                    transcript.push(line);
                }
                status = child.wait() => break status,
                _ = cancel.cancelled(), if !cancel_requested => {
                    cancel_requested = true;
                    tracing::info!(plugin = %invocation.plugin, pid, "cancellation requested");
                    request_termination(&mut child, pid);
                    kill_deadline = Some(Instant::now() + self.grace_period);
                }
                _ = sleep_until(kill_deadline.unwrap_or_else(Instant::now)), if kill_deadline.is_some() => {
                    tracing::warn!(plugin = %invocation.plugin, pid, "grace period elapsed, killing");
                    force_kill(&mut child, pid);
                    kill_deadline = None;
                }
            }
        };

        let drain = async {
            while let Some(line) = rx.recv().await {
                on_line(&line);
                transcript.push(line);
            }
        };
        if timeout(self.drain_timeout, drain).await.is_err() {
            tracing::debug!(plugin = %invocation.plugin, "output still open after exit, stopped draining");
        }
        for reader in readers {
            reader.abort();
        }

        let status = if cancel_requested {
            RunStatus::Cancelled
        } else {
            exit_status(exit)
        };
        tracing::info!(plugin = %invocation.plugin, %status, lines = transcript.len(), "run finished");
        finish(status, transcript)
    }
}

fn spawn(invocation: &Invocation) -> std::io::Result<Child> {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&invocation.output_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd.spawn()
}

fn exit_status(exit: std::io::Result<ExitStatus>) -> RunStatus {
    match exit {
        Ok(status) if status.success() => RunStatus::Succeeded,
        Ok(status) => RunStatus::Failed {
            exit_code: status.code(),
        },
        Err(e) => {
            tracing::warn!(error = %e, "waiting for child failed");
            RunStatus::Failed { exit_code: None }
        }
    }
}

/// Forward lines from one stream until EOF or the receiver goes away.
async fn pump<R>(reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.ends_with(b"\n") {
                    buf.pop();
                    if buf.ends_with(b"\r") {
                        buf.pop();
                    }
                }
                let text = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(OutputLine::new(stream, text)).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(?stream, error = %e, "stopped reading child output");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
            tracing::debug!(pid, ?signal, error = %e, "signalling process group failed");
        }
    }
}

#[cfg(unix)]
fn request_termination(_child: &mut Child, pid: Option<u32>) {
    signal_group(pid, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}

fn force_kill(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "kill failed (child already gone?)");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    fn bash_invocation(dir: &Path, body: &str) -> Invocation {
        let script = dir.join("script.sh");
        fs::write(&script, body).unwrap();
        let output_dir = dir.join("out");
        fs::create_dir_all(&output_dir).unwrap();
        Invocation {
            plugin: "Test".to_string(),
            program: PathBuf::from("bash"),
            args: vec![script.into_os_string()],
            env: vec![("GREETING".to_string(), "hello".to_string())],
            output_dir,
        }
    }

    #[tokio::test]
    async fn test_success_streams_tagged_lines() {
        let dir = tempfile::tempdir().unwrap();
        let inv = bash_invocation(dir.path(), "echo \"$GREETING\"\necho oops >&2\necho done\n");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let outcome = ExecutionEngine::default()
            .run(&inv, move |l| sink.lock().unwrap().push(l.clone()), &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(outcome.transcript.text(OutputStream::Stdout), "hello\ndone");
        assert_eq!(outcome.transcript.text(OutputStream::Stderr), "oops");
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert!(outcome.finished_at >= outcome.started_at);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed_with_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let inv = bash_invocation(dir.path(), "echo partial\nexit 3\n");
        let outcome = ExecutionEngine::default()
            .run(&inv, |_| {}, &CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RunStatus::Failed { exit_code: Some(3) });
        assert_eq!(outcome.transcript.text(OutputStream::Stdout), "partial");
        assert!(outcome.output_dir.is_dir());
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = bash_invocation(dir.path(), "");
        inv.program = PathBuf::from("/nonexistent/interpreter");
        let outcome = ExecutionEngine::default()
            .run(&inv, |_| {}, &CancellationToken::new())
            .await;
        assert!(matches!(outcome.status, RunStatus::LaunchFailed { .. }));
        assert!(outcome.transcript.is_empty());
    }

    #[tokio::test]
    async fn test_working_directory_is_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let inv = bash_invocation(dir.path(), "touch result.txt\n");
        let outcome = ExecutionEngine::default()
            .run(&inv, |_| {}, &CancellationToken::new())
            .await;
        assert!(outcome.is_success());
        assert!(inv.output_dir.join("result.txt").exists());
    }

    #[tokio::test]
    async fn test_lossy_decoding_and_crlf() {
        let dir = tempfile::tempdir().unwrap();
        let inv = bash_invocation(dir.path(), "printf 'bad\\xff\\n'\nprintf 'dos\\r\\n'\n");
        let outcome = ExecutionEngine::default()
            .run(&inv, |_| {}, &CancellationToken::new())
            .await;
        assert!(outcome.is_success());
        let lines = outcome.transcript.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].text.starts_with("bad"));
        assert!(lines[0].text.contains('\u{FFFD}'));
        assert_eq!(lines[1].text, "dos");
    }

    #[tokio::test]
    async fn test_cancel_cooperative_child() {
        let dir = tempfile::tempdir().unwrap();
        let inv = bash_invocation(dir.path(), "echo ready\nsleep 30\n");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let outcome = ExecutionEngine::new(Duration::from_secs(5))
            .run(
                &inv,
                move |l| {
                    if l.text == "ready" {
                        trigger.cancel();
                    }
                },
                &cancel,
            )
            .await;
        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert!(outcome.duration() < chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn test_cancel_escalates_when_term_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let inv = bash_invocation(dir.path(), "trap '' TERM\necho ready\nsleep 30\necho survived\n");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let started = std::time::Instant::now();

        let outcome = ExecutionEngine::new(Duration::from_millis(300))
            .run(
                &inv,
                move |l| {
                    if l.text == "ready" {
                        trigger.cancel();
                    }
                },
                &cancel,
            )
            .await;
        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!outcome.transcript.text(OutputStream::Stdout).contains("survived"));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let inv = bash_invocation(dir.path(), "touch ran\n");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = ExecutionEngine::default().run(&inv, |_| {}, &cancel).await;
        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert!(!inv.output_dir.join("ran").exists());
    }
}
