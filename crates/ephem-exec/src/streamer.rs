// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming execution of an external process.
//!
//! Output is read line by line on two reader tasks (stdout, stderr) and
//! forwarded through a bounded queue to the caller's `on_line` callback while
//! the full text is accumulated for the result. When the queue is full,
//! non-terminal lines are coalesced (counted in `dropped_lines`, still present
//! in the accumulated output); terminal lines wait for room instead.
//!
//! A streamer runs exactly one process:
//! `NotStarted -> Running -> {Completed, Failed, TimedOut}`.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ephem_config::model::ExecConfig;
use ephem_core::{CapturedOutput, EphemError};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::CommandSpec;
use crate::progress::ProgressTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionState {
    NotStarted,
    Running,
    Completed,
    /// Non-zero exit, spawn failure, cancellation, or a failing callback.
    Failed,
    TimedOut,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::TimedOut
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of process output, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// How the select loop ended.
enum Stop {
    Exited(std::process::ExitStatus),
    Cancelled,
    TimedOut,
    Callback(EphemError),
    WaitFailed(std::io::Error),
}

pub struct ExecutionStreamer {
    state: ExecutionState,
    line_buffer: usize,
    drain_grace: Duration,
    is_terminal_line: fn(&str) -> bool,
}

impl ExecutionStreamer {
    pub fn new(line_buffer: usize, drain_grace: Duration) -> Self {
        Self {
            state: ExecutionState::NotStarted,
            line_buffer: line_buffer.max(1),
            drain_grace,
            is_terminal_line: ProgressTracker::is_terminal_line,
        }
    }

    pub fn from_config(config: &ExecConfig) -> Self {
        Self::new(config.line_buffer, config.drain_grace())
    }

    /// Replaces the classifier deciding which lines must never be coalesced.
    pub fn with_line_classifier(mut self, classify: fn(&str) -> bool) -> Self {
        self.is_terminal_line = classify;
        self
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    fn transition(&mut self, next: ExecutionState) {
        if self.state.is_terminal() {
            return;
        }
        debug!(from = ?self.state, to = ?next, "execution state");
        self.state = next;
    }

    /// Runs `command` to completion, calling `on_line` for each output line as
    /// it arrives.
    ///
    /// The child sees only `base_env`, then `command.env`, then `injected_env`
    /// (later layers win). Returns the captured output on a zero exit status.
    /// On timeout, cancellation, or a failing callback the process is killed
    /// and reaped before this returns. `Timeout`, `Cancelled` and
    /// `ProcessFailure` carry whatever output was captured.
    pub async fn run<F>(
        &mut self,
        command: &CommandSpec,
        base_env: &BTreeMap<String, String>,
        injected_env: &BTreeMap<String, String>,
        mut on_line: F,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CapturedOutput, EphemError>
    where
        F: FnMut(&str) -> Result<(), EphemError>,
    {
        if self.state != ExecutionState::NotStarted {
            return Err(EphemError::Internal(format!(
                "execution streamer already used (state {:?})",
                self.state
            )));
        }

        let mut child = match spawn(command, base_env, injected_env) {
            Ok(child) => child,
            Err(e) => {
                self.transition(ExecutionState::Failed);
                return Err(e);
            }
        };
        self.transition(ExecutionState::Running);
        // Kept for killpg: `Child::id` is gone once the child has been reaped.
        let pid = child.id();
        info!(command = %command.display(), pid = ?pid, timeout_secs = timeout.as_secs(), "process started");

        let (tx, mut rx) = mpsc::channel::<OutputLine>(self.line_buffer);
        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let dropped = Arc::new(AtomicU64::new(0));
        let pipes_open = Arc::new(AtomicUsize::new(0));

        let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pipes_open.fetch_add(1, Ordering::SeqCst);
            readers.push(tokio::spawn(pump(
                stdout,
                OutputStream::Stdout,
                stdout_buf.clone(),
                tx.clone(),
                dropped.clone(),
                pipes_open.clone(),
                self.is_terminal_line,
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            pipes_open.fetch_add(1, Ordering::SeqCst);
            readers.push(tokio::spawn(pump(
                stderr,
                OutputStream::Stderr,
                stderr_buf.clone(),
                tx.clone(),
                dropped.clone(),
                pipes_open.clone(),
                self.is_terminal_line,
            )));
        }
        drop(tx);

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        // Armed when the child exits. If a descendant still holds stdout or
        // stderr when it fires, the process group is killed to close them.
        let linger = tokio::time::sleep(self.drain_grace);
        tokio::pin!(linger);

        // Deliver lines until both streams close and the exit status is known.
        let mut streams_open = true;
        let mut exited: Option<std::process::ExitStatus> = None;
        let mut linger_armed = false;
        let stop = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Stop::Cancelled,
                _ = &mut deadline => break Stop::TimedOut,
                line = rx.recv(), if streams_open => match line {
                    Some(line) => {
                        if let Err(e) = on_line(&line.text) {
                            break Stop::Callback(e);
                        }
                    }
                    None => {
                        streams_open = false;
                        if let Some(status) = exited {
                            break Stop::Exited(status);
                        }
                    }
                },
                status = child.wait(), if exited.is_none() => match status {
                    Ok(status) if !streams_open => break Stop::Exited(status),
                    Ok(status) => {
                        exited = Some(status);
                        linger_armed = true;
                        linger.as_mut().reset(tokio::time::Instant::now() + self.drain_grace);
                    }
                    Err(e) => break Stop::WaitFailed(e),
                },
                _ = &mut linger, if linger_armed => {
                    linger_armed = false;
                    // Zero open pipes means only the consumer is behind; keep delivering.
                    if pipes_open.load(Ordering::SeqCst) > 0 {
                        debug!(pid = ?pid, "process exited but its output is still held open, killing the group");
                        kill_group(pid);
                    }
                }
            }
        };
        drop(rx);

        let exit_status = match &stop {
            Stop::Exited(status) => Some(*status),
            _ => {
                terminate(&mut child, pid, self.drain_grace).await;
                None
            }
        };
        drain_readers(readers, self.drain_grace).await;

        let output = CapturedOutput {
            exit_code: exit_status.and_then(|s| s.code()),
            stdout: take_buffer(&stdout_buf),
            stderr: take_buffer(&stderr_buf),
            dropped_lines: dropped.load(Ordering::SeqCst),
        };
        if output.dropped_lines > 0 {
            debug!(dropped = output.dropped_lines, "coalesced non-terminal lines under back-pressure");
        }

        match stop {
            Stop::Exited(status) if status.success() => {
                self.transition(ExecutionState::Completed);
                info!(command = %command.display(), "process completed");
                Ok(output)
            }
            Stop::Exited(status) => {
                self.transition(ExecutionState::Failed);
                let exit_code = status.code().unwrap_or(-1);
                warn!(command = %command.display(), exit_code, "process failed");
                Err(EphemError::ProcessFailure {
                    exit_code,
                    output: Box::new(output),
                })
            }
            Stop::TimedOut => {
                self.transition(ExecutionState::TimedOut);
                warn!(command = %command.display(), timeout_secs = timeout.as_secs(), "process timed out and was killed");
                Err(EphemError::Timeout {
                    duration: timeout,
                    output: Box::new(output),
                })
            }
            Stop::Cancelled => {
                self.transition(ExecutionState::Failed);
                info!(command = %command.display(), "process cancelled");
                Err(EphemError::Cancelled {
                    output: Box::new(output),
                })
            }
            Stop::Callback(e) => {
                self.transition(ExecutionState::Failed);
                warn!(command = %command.display(), error = %e, "output consumer failed, process killed");
                Err(e)
            }
            Stop::WaitFailed(e) => {
                self.transition(ExecutionState::Failed);
                Err(EphemError::Internal(format!("failed to wait for process: {e}")))
            }
        }
    }
}

fn spawn(
    command: &CommandSpec,
    base_env: &BTreeMap<String, String>,
    injected_env: &BTreeMap<String, String>,
) -> Result<Child, EphemError> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .env_clear()
        .envs(base_env)
        .envs(&command.env)
        .envs(injected_env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &command.working_dir {
        cmd.current_dir(dir);
    }
    // Own process group, so the whole tree can be killed at once.
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn().map_err(|source| EphemError::Spawn {
        program: command.program.clone(),
        source,
    })
}

/// Sends SIGKILL to the process group led by `pid`.
fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // SAFETY: killpg has no memory-safety preconditions. The group id is
        // the child's pid because it was spawned with process_group(0).
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc != 0 {
            debug!(pid, "killpg failed");
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Kills the process (and its group on unix) and reaps it within `grace`.
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) {
    kill_group(pid);
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "start_kill failed (process likely already exited)");
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(?status, "killed process reaped"),
        Ok(Err(e)) => warn!(error = %e, "failed to reap killed process"),
        Err(_) => warn!("killed process not reaped within grace period"),
    }
}

/// Waits for reader tasks to see EOF, aborting any still running after `grace`.
async fn drain_readers(readers: Vec<JoinHandle<()>>, grace: Duration) {
    for mut reader in readers {
        if tokio::time::timeout(grace, &mut reader).await.is_err() {
            reader.abort();
        }
    }
}

fn take_buffer(buf: &Arc<Mutex<String>>) -> String {
    let mut guard = buf.lock().unwrap_or_else(|e| e.into_inner());
    std::mem::take(&mut *guard)
}

async fn pump<R>(
    reader: R,
    stream: OutputStream,
    buf: Arc<Mutex<String>>,
    tx: mpsc::Sender<OutputLine>,
    dropped: Arc<AtomicU64>,
    pipes_open: Arc<AtomicUsize>,
    is_terminal_line: fn(&str) -> bool,
) where
    R: AsyncRead + Unpin,
{
    forward_lines(reader, stream, &buf, &tx, &dropped, is_terminal_line).await;
    pipes_open.fetch_sub(1, Ordering::SeqCst);
}

async fn forward_lines<R>(
    reader: R,
    stream: OutputStream,
    buf: &Mutex<String>,
    tx: &mpsc::Sender<OutputLine>,
    dropped: &AtomicU64,
    is_terminal_line: fn(&str) -> bool,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();
    // Once the consumer is gone, keep accumulating without forwarding.
    let mut forwarding = true;
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(?stream, error = %e, "error reading process output");
                break;
            }
        }

        let text = String::from_utf8_lossy(&raw);
        {
            let mut acc = buf.lock().unwrap_or_else(|e| e.into_inner());
            acc.push_str(&text);
            if !text.ends_with('\n') {
                acc.push('\n');
            }
        }
        if !forwarding {
            continue;
        }

        let line = OutputLine {
            stream,
            text: text.trim_end_matches(['\n', '\r']).to_string(),
        };
        if is_terminal_line(&line.text) {
            if tx.send(line).await.is_err() {
                forwarding = false;
            }
        } else {
            match tx.try_send(line) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    dropped.fetch_add(1, Ordering::SeqCst);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => forwarding = false,
            }
        }
    }
}
