//! Local subprocess execution with timeout and cancellation
//!
//! Every external tool (yt-dlp, gallery-dl, ffprobe, ffmpeg) goes through
//! [`run_command`]. The child is spawned with kill-on-drop, so dropping the
//! returned future on any path also kills the process.

use crate::error::JobError;
use std::ffi::OsStr;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// How long a killed child gets to be reaped
const KILL_GRACE: Duration = Duration::from_secs(5);
/// How long we wait for output once the process is gone
const TAIL_WAIT: Duration = Duration::from_secs(1);
/// Stand-in deadline for limits too large to add to `now`
const FAR_FUTURE_SECS: u64 = 100 * 365 * 24 * 60 * 60;
const READ_CHUNK: usize = 8192;

/// Result of running an external command
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Standard output of the command
    pub stdout: String,
    /// Standard error of the command
    pub stderr: String,
    /// Exit code of the command (-1 when killed by a signal)
    pub exit_code: i32,
}

impl ExecResult {
    /// Check if the command succeeded (exit code 0)
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr)
    #[must_use]
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

enum Exit {
    Finished(io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run `program` with `args`, waiting at most `timeout`.
///
/// Output is drained by background tasks while the child runs, so a chatty
/// process never blocks on a full pipe. The limit also bounds output
/// collection: a background grandchild holding the pipes open past it is
/// abandoned and whatever was read so far is returned.
///
/// # Errors
///
/// - `JobError::Timeout` if the limit expires (the child is killed)
/// - `JobError::Cancelled` if `cancel` fires (the child is killed)
/// - `JobError::DownloadFailed` if the program cannot be started or waited on
///
/// A non-zero exit code is not an error; check [`ExecResult::success`].
#[instrument(
    skip_all,
    fields(program = %program.as_ref().to_string_lossy(), timeout_secs = timeout.as_secs())
)]
pub async fn run_command<S: AsRef<OsStr>>(
    program: impl AsRef<OsStr>,
    args: &[S],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ExecResult, JobError> {
    let program_name = program.as_ref().to_string_lossy().to_string();
    let deadline = deadline_after(timeout);

    let mut child = Command::new(program.as_ref())
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| JobError::DownloadFailed(format!("failed to start {program_name}: {e}")))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let exit = tokio::select! {
        status = child.wait() => Exit::Finished(status),
        () = tokio::time::sleep_until(deadline) => Exit::TimedOut,
        () = cancel.cancelled() => Exit::Cancelled,
    };

    let status = match exit {
        Exit::Finished(status) => status.map_err(|e| {
            JobError::DownloadFailed(format!("failed to wait for {program_name}: {e}"))
        })?,
        Exit::TimedOut => {
            warn!(timeout_secs = timeout.as_secs(), "Command timed out, killing process");
            terminate(&mut child).await;
            log_tail(stdout, stderr).await;
            return Err(JobError::Timeout { after: timeout });
        }
        Exit::Cancelled => {
            warn!("Command cancelled, killing process");
            terminate(&mut child).await;
            log_tail(stdout, stderr).await;
            return Err(JobError::Cancelled);
        }
    };

    // Readers get until the deadline, and never less than the tail wait
    let until = deadline.max(Instant::now() + TAIL_WAIT);
    let result = ExecResult {
        stdout: collect(stdout, until).await,
        stderr: collect(stderr, until).await,
        exit_code: status.code().unwrap_or(-1),
    };

    debug!(
        exit_code = result.exit_code,
        stdout_len = result.stdout.len(),
        stderr_len = result.stderr.len(),
        "Command completed"
    );

    Ok(result)
}

/// `now + timeout`, saturating at a far but representable instant
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

/// Background reader of one output pipe
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl Drain {
    fn take(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

fn drain<R>(pipe: Option<R>) -> Option<Drain>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pipe.map(|mut reader| {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let task = tokio::spawn(async move {
            let mut chunk = vec![0_u8; READ_CHUNK];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        debug!(error = %e, "Pipe read stopped early");
                        break;
                    }
                }
            }
        });
        Drain { buf, task }
    })
}

/// Wait for the reader until `until`, then abandon it and keep what it read.
async fn collect(drain: Option<Drain>, until: Instant) -> String {
    let Some(mut drain) = drain else {
        return String::new();
    };
    if tokio::time::timeout_at(until, &mut drain.task).await.is_err() {
        debug!("Output pipe still open after exit, abandoning reader");
        drain.task.abort();
    }
    drain.take()
}

/// Log the last stderr line of a killed process and stop both readers.
///
/// Grandchildren may keep the pipes open after the kill, so stderr gets a
/// short deadline and stdout is dropped right away.
async fn log_tail(stdout: Option<Drain>, stderr: Option<Drain>) {
    if let Some(stdout) = stdout {
        stdout.task.abort();
    }
    let stderr = collect(stderr, Instant::now() + TAIL_WAIT).await;
    if let Some(last) = stderr.lines().rev().find(|line| !line.trim().is_empty()) {
        debug!(stderr_tail = %last, "Output of killed process");
    }
}

/// Kill the child and wait briefly for it to be reaped.
async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        // Already exited between the select and the kill
        debug!(error = %e, "Kill signal not delivered");
    }
    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!(?status, "Killed process reaped"),
        Ok(Err(e)) => warn!(error = %e, "Failed to reap killed process"),
        Err(_) => warn!("Killed process was not reaped within the grace period"),
    }
}
