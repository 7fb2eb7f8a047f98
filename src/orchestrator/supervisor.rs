//! Process supervisor: one external agent run per prompt execution.
//!
//! Streams stdout to the caller in bounded text chunks, keeps a capped tail
//! of stderr for the exit report, and on cancellation escalates from a
//! graceful termination signal to a forced kill after a grace window.
//!
//! On unix the agent leads its own process group and both signals go to the
//! whole group, so helpers the agent spawned stop with it.

use std::future::pending;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::orchestrator::launch::LaunchConfig;
use crate::{AppError, Result};

const READ_BUF_BYTES: usize = 8 * 1024;

/// Bounds applied to a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorLimits {
    /// Maximum characters per stdout chunk handed to the caller.
    pub chunk_chars: usize,
    /// Characters of stderr retained.
    pub stderr_cap_chars: usize,
    /// Delay between the termination signal and the forced kill.
    pub kill_grace: Duration,
}

/// How the agent process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exit code zero.
    Success,
    /// Non-zero exit code.
    ExitCode(i32),
    /// Killed by a signal.
    Signal(i32),
    /// The process never started.
    LaunchFailed(String),
}

/// Result of [`run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Exit classification.
    pub exit: ExitOutcome,
    /// Last `stderr_cap_chars` characters of stderr.
    pub stderr: String,
    /// The run was cancelled before the process exited.
    pub cancelled: bool,
}

enum Step {
    Stdout(std::io::Result<usize>),
    Stderr(std::io::Result<usize>),
    Exited(std::io::Result<ExitStatus>),
    Cancel,
    Kill,
}

/// Launch the agent and supervise it until it exits.
///
/// `on_stdout` receives decoded stdout text in order, each piece at most
/// `limits.chunk_chars` characters. Output produced after cancellation is
/// discarded. Never fails: launch errors come back as
/// [`ExitOutcome::LaunchFailed`].
pub async fn run<F>(
    launch: &LaunchConfig,
    limits: SupervisorLimits,
    cancel: &CancellationToken,
    mut on_stdout: F,
) -> RunOutcome
where
    F: FnMut(String) + Send,
{
    let mut child = match spawn_agent(launch) {
        Ok(child) => child,
        Err(err) => {
            warn!(program = %launch.program, %err, "failed to launch agent");
            let reason = match err {
                AppError::Launch(reason) => reason,
                other => other.to_string(),
            };
            return RunOutcome {
                exit: ExitOutcome::LaunchFailed(reason),
                stderr: String::new(),
                cancelled: cancel.is_cancelled(),
            };
        }
    };

    let pid = child.id();
    let group = ProcessGroup::of(pid);
    let span = info_span!("agent_process", pid = pid.unwrap_or(0));
    supervise(&mut child, group, limits, cancel, &mut on_stdout)
        .instrument(span)
        .await
}

/// Start `launch` with piped output, in a new process group on unix.
///
/// # Errors
///
/// Returns `AppError::Launch` with the OS error text if the program cannot
/// be started.
fn spawn_agent(launch: &LaunchConfig) -> Result<Child> {
    let mut command = Command::new(&launch.program);
    command
        .args(&launch.args)
        .envs(launch.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&launch.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    command.spawn().map_err(|err| AppError::Launch(err.to_string()))
}

async fn supervise<F>(
    child: &mut Child,
    group: ProcessGroup,
    limits: SupervisorLimits,
    cancel: &CancellationToken,
    on_stdout: &mut F,
) -> RunOutcome
where
    F: FnMut(String) + Send,
{
    info!("agent process started");
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = vec![0u8; READ_BUF_BYTES];
    let mut err_buf = vec![0u8; READ_BUF_BYTES];

    let mut carry: Vec<u8> = Vec::new();
    let mut stderr_text = String::new();
    let mut cancelled = false;
    let mut kill_at: Option<Instant> = None;

    let status = loop {
        let step = tokio::select! {
            biased;
            () = cancel.cancelled(), if !cancelled => Step::Cancel,
            () = sleep_until(kill_at), if kill_at.is_some() => Step::Kill,
            status = child.wait() => Step::Exited(status),
            n = read_some(&mut stdout, &mut out_buf) => Step::Stdout(n),
            n = read_some(&mut stderr, &mut err_buf) => Step::Stderr(n),
        };

        match step {
            Step::Cancel => {
                cancelled = true;
                info!(grace = ?limits.kill_grace, "cancelling agent process");
                group.terminate(child);
                kill_at = Some(Instant::now() + limits.kill_grace);
            }
            Step::Kill => {
                kill_at = None;
                warn!("agent ignored termination signal, killing");
                group.kill(child);
            }
            Step::Stdout(Ok(n)) if n > 0 => {
                carry.extend_from_slice(&out_buf[..n]);
                let text = take_utf8(&mut carry);
                if !cancelled {
                    emit_chunks(&text, limits.chunk_chars, on_stdout);
                }
            }
            Step::Stdout(_) => stdout = None,
            Step::Stderr(Ok(n)) if n > 0 => {
                push_capped(&mut stderr_text, &String::from_utf8_lossy(&err_buf[..n]), limits.stderr_cap_chars);
            }
            Step::Stderr(_) => stderr = None,
            Step::Exited(status) => break status,
        }
    };

    // Helpers that outlived a cancelled agent would hold its pipes open.
    if cancelled {
        group.kill_stragglers();
    }

    // Whatever the process wrote just before exiting is still in the pipes.
    let drain_window = limits.kill_grace.max(Duration::from_millis(100));
    if let Some(mut out) = stdout.take() {
        let mut rest = Vec::new();
        if tokio::time::timeout(drain_window, out.read_to_end(&mut rest)).await.is_err() {
            debug!("stdout still open after exit, giving up on drain");
        }
        carry.extend_from_slice(&rest);
    }
    if !carry.is_empty() && !cancelled {
        let text = String::from_utf8_lossy(&carry).into_owned();
        emit_chunks(&text, limits.chunk_chars, on_stdout);
    }
    if let Some(mut err) = stderr.take() {
        let mut rest = Vec::new();
        if tokio::time::timeout(drain_window, err.read_to_end(&mut rest)).await.is_err() {
            debug!("stderr still open after exit, giving up on drain");
        }
        push_capped(&mut stderr_text, &String::from_utf8_lossy(&rest), limits.stderr_cap_chars);
    }

    let exit = match status {
        Ok(status) => classify(status),
        Err(err) => {
            warn!(%err, "failed to wait for agent process");
            ExitOutcome::ExitCode(-1)
        }
    };
    info!(?exit, cancelled, "agent process exited");
    RunOutcome {
        exit,
        stderr: stderr_text,
        cancelled,
    }
}

async fn read_some<R>(stream: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match stream {
        Some(stream) => stream.read(buf).await,
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

// ── Signalling ──────────────────────────────────────────────────────────────

/// The agent's process group, led by the agent itself.
#[derive(Debug, Clone, Copy)]
struct ProcessGroup(Option<i32>);

impl ProcessGroup {
    fn of(pid: Option<u32>) -> Self {
        Self(pid.and_then(|pid| i32::try_from(pid).ok()))
    }

    /// Ask every process in the group to exit.
    #[cfg_attr(not(unix), allow(clippy::unused_self))]
    fn terminate(self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pgid) = self.0 {
            signal_group(pgid, nix::sys::signal::Signal::SIGTERM);
            return;
        }
        if let Err(err) = child.start_kill() {
            debug!(%err, "terminate failed; process already gone");
        }
    }

    /// Force-kill the group and the direct child.
    fn kill(self, child: &mut Child) {
        self.kill_stragglers();
        if let Err(err) = child.start_kill() {
            debug!(%err, "kill failed; process already gone");
        }
    }

    /// SIGKILL every process still in the group.
    #[cfg_attr(not(unix), allow(clippy::unused_self))]
    fn kill_stragglers(self) {
        #[cfg(unix)]
        if let Some(pgid) = self.0 {
            signal_group(pgid, nix::sys::signal::Signal::SIGKILL);
        }
    }
}

#[cfg(unix)]
fn signal_group(pgid: i32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) => debug!(pgid, ?signal, "signalled agent process group"),
        Err(nix::errno::Errno::ESRCH) => debug!(pgid, ?signal, "agent process group already gone"),
        Err(err) => warn!(pgid, ?signal, %err, "failed to signal agent process group"),
    }
}

#[cfg(unix)]
fn classify(status: ExitStatus) -> ExitOutcome {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(0), _) => ExitOutcome::Success,
        (Some(code), _) => ExitOutcome::ExitCode(code),
        (None, Some(signal)) => ExitOutcome::Signal(signal),
        (None, None) => ExitOutcome::ExitCode(-1),
    }
}

#[cfg(not(unix))]
fn classify(status: ExitStatus) -> ExitOutcome {
    match status.code() {
        Some(0) => ExitOutcome::Success,
        Some(code) => ExitOutcome::ExitCode(code),
        None => ExitOutcome::ExitCode(-1),
    }
}

/// Take the longest decodable prefix of `carry`, leaving an incomplete
/// trailing UTF-8 sequence for the next read.
fn take_utf8(carry: &mut Vec<u8>) -> String {
    let incomplete = match std::str::from_utf8(carry) {
        Err(err) if err.error_len().is_none() => carry.len() - err.valid_up_to(),
        _ => 0,
    };
    let tail = carry.split_off(carry.len() - incomplete);
    let text = String::from_utf8_lossy(carry).into_owned();
    *carry = tail;
    text
}

fn emit_chunks<F: FnMut(String)>(text: &str, max_chars: usize, on_stdout: &mut F) {
    for chunk in chunk_text(text, max_chars) {
        on_stdout(chunk);
    }
}

/// Split `text` into pieces of at most `max_chars` characters.
#[must_use]
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for ch in text.chars() {
        if count == max_chars {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Append `text`, keeping only the last `cap` characters.
fn push_capped(buf: &mut String, text: &str, cap: usize) {
    buf.push_str(text);
    let excess = buf.chars().count().saturating_sub(cap);
    if excess > 0 {
        let cut = buf.char_indices().nth(excess).map_or(buf.len(), |(i, _)| i);
        buf.replace_range(..cut, "");
    }
}
