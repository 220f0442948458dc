//! Wraps one external subprocess: lifecycle tracking, stderr forwarding,
//! and a kill that is always safe to call.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{watch, Mutex, Notify};

/// The terminal state of one child process, mirroring Node's
/// `{ exitCode, signal }` close payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        self.signal.is_none() && self.exit_code == Some(0)
    }
}

/// Why a stage is considered failed: nonzero exit, a terminating signal,
/// an error spawning/driving the process itself, or a stream error on its
/// stdin/stdout.
#[derive(Debug, Clone, Error)]
pub enum StageFailure {
    #[error("stage '{title}' exited with status {exit_code:?}, signal {signal:?}")]
    NonZeroExit {
        title: &'static str,
        exit_code: Option<i32>,
        signal: Option<i32>,
    },
    #[error("stage '{title}' process error: {message}")]
    ProcessError { title: &'static str, message: String },
    #[error("stage '{title}' stream error: {message}")]
    StreamError { title: &'static str, message: String },
}

/// A running (or exited) external subprocess, one per [`Stage`](gateway_types::Stage).
pub struct ProcessHandle {
    pub title: &'static str,
    pub argv: Vec<String>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<ChildStdout>>,
    closed: Arc<AtomicBool>,
    kill_notify: Arc<Notify>,
    outcome_rx: watch::Receiver<Option<Result<ProcessOutcome, StageFailure>>>,
}

impl ProcessHandle {
    /// Spawns `executable argv…` with piped stdio, optionally in `cwd`.
    /// stderr is drained line-by-line to `tracing::error!` in the
    /// background, prefixed with `title`, until the child closes.
    pub fn spawn(
        title: &'static str,
        executable: &str,
        argv: Vec<String>,
        cwd: Option<&Path>,
    ) -> std::io::Result<Self> {
        let mut cmd = tokio::process::Command::new(executable);
        cmd.args(&argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let mut child: Child = cmd.spawn()?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let closed = Arc::new(AtomicBool::new(false));
        let kill_notify = Arc::new(Notify::new());
        let (outcome_tx, outcome_rx) = watch::channel(None);

        if let Some(stderr) = stderr {
            tokio::spawn(forward_stderr(title, stderr));
        }

        {
            let closed = closed.clone();
            let kill_notify = kill_notify.clone();
            tokio::spawn(async move {
                let outcome = drive_child(title, &mut child, &kill_notify).await;
                closed.store(true, Ordering::SeqCst);
                // The receiver side may have been dropped (e.g. the
                // pipeline settled already via another path); that is not
                // an error here.
                let _ = outcome_tx.send(Some(outcome));
            });
        }

        Ok(Self {
            title,
            argv,
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(stdout),
            closed,
            kill_notify,
            outcome_rx,
        })
    }

    /// Requests termination. Guaranteed to be a no-op once the child has
    /// already closed.
    pub fn kill(&self) {
        if !self.closed.load(Ordering::SeqCst) {
            self.kill_notify.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Takes ownership of the child's stdin, for wiring into a predecessor
    /// stage's stdout. Returns `None` if already taken.
    pub async fn take_stdin(&self) -> Option<ChildStdin> {
        self.stdin.lock().await.take()
    }

    /// Takes ownership of the child's stdout, for wiring into a successor
    /// stage's stdin, or into the terminal tee (checksum + sink).
    pub async fn take_stdout(&self) -> Option<ChildStdout> {
        self.stdout.lock().await.take()
    }

    /// Resolves exactly once the child has reached a terminal state.
    /// Independent callers may each hold their own clone of the watch
    /// channel and await it without re-driving the child or missing the
    /// value — this is what lets the engine await every stage both
    /// individually (for logging) and jointly (for settlement).
    pub async fn wait(&self) -> Result<ProcessOutcome, StageFailure> {
        let mut rx = self.outcome_rx.clone();
        loop {
            if let Some(result) = rx.borrow().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(StageFailure::ProcessError {
                    title: self.title,
                    message: "process supervisor task ended without publishing an outcome".into(),
                });
            }
        }
    }
}

async fn drive_child(
    title: &'static str,
    child: &mut Child,
    kill_notify: &Notify,
) -> Result<ProcessOutcome, StageFailure> {
    loop {
        tokio::select! {
            status = child.wait() => {
                return match status {
                    Ok(status) => {
                        let outcome = ProcessOutcome {
                            exit_code: status.code(),
                            signal: unix_signal(&status),
                        };
                        if outcome.is_success() {
                            Ok(outcome)
                        } else {
                            Err(StageFailure::NonZeroExit {
                                title,
                                exit_code: outcome.exit_code,
                                signal: outcome.signal,
                            })
                        }
                    }
                    Err(e) => Err(StageFailure::ProcessError {
                        title,
                        message: e.to_string(),
                    }),
                };
            }
            _ = kill_notify.notified() => {
                if let Err(e) = child.start_kill() {
                    tracing::debug!(stage = title, error = %e, "kill() on already-exited child");
                }
                // loop back around and keep waiting for the real exit.
            }
        }
    }
}

#[cfg(unix)]
fn unix_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn unix_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

async fn forward_stderr(title: &'static str, stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::error!(stage = title, "{line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(stage = title, error = %e, "stderr reader ended");
                break;
            }
        }
    }
}

/// Reads the remaining stdout of a handle to end-of-stream, for tests
/// that only care about the produced bytes rather than the wiring.
#[cfg(test)]
pub(crate) async fn drain_stdout(handle: &ProcessHandle) -> Vec<u8> {
    let mut stdout = handle.take_stdout().await.expect("stdout already taken");
    let mut buf = Vec::new();
    stdout.read_to_end(&mut buf).await.expect("read stdout");
    buf
}
