//! Subprocess execution and lifecycle management for one Codex run.
//!
//! A single task owns the child and all three pipes. One `select!` loop
//! writes the request, drains stdout and stderr line by line, waits for exit,
//! and watches the cancellation token and the deadline. The token is polled
//! first on every iteration. Pipes close when the loop returns, on every path.

use crate::env::EnvMap;
use crate::error::BridgeError;
use crate::stream::translate_line;
use crate::types::ProgressSender;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio_util::sync::CancellationToken;

const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024; // 10 MB
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Everything needed to start the tool.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    /// Program followed by its arguments.
    pub argv: Vec<OsString>,
    /// Complete environment; nothing is inherited beyond it.
    pub env: EnvMap,
    /// Directory the tool starts in; `None` inherits ours.
    pub working_dir: Option<PathBuf>,
    /// Deadline for the whole run, measured from spawn.
    pub timeout: Option<Duration>,
}

/// Text captured from the two output channels, one `\n` per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Primary channel, the tool's JSON event stream.
    pub stdout: String,
    /// Secondary channel.
    pub stderr: String,
}

/// A run that reached process exit.
#[derive(Debug)]
pub struct SupervisedRun {
    /// Text captured up to exit.
    pub output: CapturedOutput,
    /// Exit code, `-1` when the process was ended by a signal.
    pub exit_code: i32,
    /// Process id of the tool.
    pub pid: u32,
    /// Time from spawn to exit.
    pub elapsed: Duration,
}

impl SupervisedRun {
    /// Keeps the output of a zero exit; anything else is `NonZeroExit`
    /// carrying the stderr text.
    ///
    /// # Errors
    /// `NonZeroExit` for any exit code other than zero.
    pub fn into_success(self) -> Result<CapturedOutput, BridgeError> {
        if self.exit_code == 0 {
            Ok(self.output)
        } else {
            Err(BridgeError::NonZeroExit {
                exit_code: self.exit_code,
                stderr: self.output.stderr,
            })
        }
    }
}

/// Bounded line accumulator for one channel.
struct Capture {
    channel: &'static str,
    text: String,
    truncated: bool,
}

impl Capture {
    const fn new(channel: &'static str) -> Self {
        Self {
            channel,
            text: String::new(),
            truncated: false,
        }
    }

    fn push(&mut self, line: &str) {
        if self.truncated {
            return;
        }
        if self.text.len() + line.len() + 1 > MAX_OUTPUT_BYTES {
            self.truncated = true;
            tracing::warn!(
                "Codex {} exceeded {MAX_OUTPUT_BYTES} bytes; dropping further lines",
                self.channel
            );
            return;
        }
        self.text.push_str(line);
        self.text.push('\n');
    }
}

/// Runs the tool to exit, cancellation or deadline.
///
/// Stdout lines are captured and, when `progress` is given, translated into
/// progress fragments in arrival order. Stderr lines are captured only.
///
/// # Errors
/// `LaunchFailed` when the process cannot be started or fed, `Cancelled`
/// when `cancel` fires (the child is killed once), `Timeout` when the
/// deadline passes. A non-zero exit is *not* an error here; see
/// [`SupervisedRun::into_success`].
pub async fn supervise(
    spec: &LaunchSpec,
    request_body: &[u8],
    cancel: &CancellationToken,
    progress: Option<&ProgressSender>,
) -> Result<SupervisedRun, BridgeError> {
    let start_time = Instant::now();
    let mut child = spawn_child(spec)?;

    let pid = child.id().ok_or_else(|| missing("pid"))?;
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    let mut stdout_lines = BufReader::new(stdout).split(b'\n');
    let mut stderr_lines = BufReader::new(stderr).split(b'\n');
    let mut stdout_capture = Capture::new("stdout");
    let mut stderr_capture = Capture::new("stderr");

    let write = write_request(stdin, request_body);
    let expiry = expire_after(spec.timeout);
    tokio::pin!(write, expiry);

    let mut request_sent = false;
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut exit_status = None;

    let status = loop {
        if !stdout_open && !stderr_open {
            if let Some(status) = exit_status {
                break status;
            }
        }

        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                if exit_status.is_none() {
                    force_kill(&mut child).await;
                }
                return Err(BridgeError::Cancelled);
            }
            () = &mut expiry => {
                let elapsed = start_time.elapsed();
                if exit_status.is_none() {
                    graceful_shutdown(&mut child, pid).await;
                }
                return Err(BridgeError::Timeout { elapsed, pid });
            }
            written = &mut write, if !request_sent => {
                request_sent = true;
                written?;
            }
            segment = stdout_lines.next_segment(), if stdout_open => {
                match decode_line(segment, "stdout") {
                    Some(line) => {
                        stdout_capture.push(&line);
                        forward_progress(progress, &line);
                    }
                    None => stdout_open = false,
                }
            }
            segment = stderr_lines.next_segment(), if stderr_open => {
                match decode_line(segment, "stderr") {
                    Some(line) => stderr_capture.push(&line),
                    None => stderr_open = false,
                }
            }
            exited = child.wait(), if exit_status.is_none() => {
                exit_status = Some(exited.map_err(|e| BridgeError::launch("wait", e))?);
            }
        }
    };

    Ok(SupervisedRun {
        output: CapturedOutput {
            stdout: stdout_capture.text,
            stderr: stderr_capture.text,
        },
        exit_code: status.code().unwrap_or(-1),
        pid,
        elapsed: start_time.elapsed(),
    })
}

/// Spawns the child with all three pipes and the composed environment.
fn spawn_child(spec: &LaunchSpec) -> Result<Child, BridgeError> {
    let (program, args) = spec
        .argv
        .split_first()
        .ok_or_else(|| BridgeError::InvalidConfig("empty command line".to_string()))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .env_clear()
        .envs(&spec.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(ref dir) = spec.working_dir {
        cmd.current_dir(dir);
    }

    cmd.spawn().map_err(|e| BridgeError::launch("spawn", e))
}

fn missing(what: &str) -> BridgeError {
    BridgeError::launch(
        format!("capture {what}"),
        std::io::Error::other(format!("child {what} unavailable")),
    )
}

/// Writes the request and closes stdin; the tool starts at end-of-input.
async fn write_request(mut stdin: ChildStdin, body: &[u8]) -> Result<(), BridgeError> {
    let written = async {
        stdin.write_all(body).await?;
        stdin.flush().await
    }
    .await;
    drop(stdin);

    match written {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {
            // The exit status will say why.
            tracing::warn!("Codex closed stdin before reading the whole request");
            Ok(())
        }
        Err(e) => Err(BridgeError::launch("write request", e)),
    }
}

async fn expire_after(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

/// Decodes one raw line; `None` ends the channel.
fn decode_line(segment: std::io::Result<Option<Vec<u8>>>, channel: &str) -> Option<String> {
    match segment {
        Ok(Some(mut bytes)) => {
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("Failed reading Codex {channel}: {e}");
            None
        }
    }
}

fn forward_progress(progress: Option<&ProgressSender>, line: &str) {
    let Some(tx) = progress else {
        return;
    };
    for fragment in translate_line(line) {
        let _ = tx.send(fragment);
    }
}

/// Single forcible termination, then reap.
async fn force_kill(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::warn!("Failed to kill Codex process: {e}");
        return;
    }
    if let Err(e) = child.wait().await {
        tracing::warn!("Failed to reap killed Codex process: {e}");
    }
}

/// Graceful shutdown: `SIGTERM`, wait grace period, then `SIGKILL`.
#[cfg(unix)]
async fn graceful_shutdown(child: &mut Child, pid: u32) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;
    use tokio::time::timeout;

    let sent = i32::try_from(pid)
        .map_err(|_| "PID value exceeds i32::MAX".to_string())
        .and_then(|raw| {
            signal::kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(|e| e.to_string())
        });

    match sent {
        Ok(()) => match timeout(GRACE_PERIOD, child.wait()).await {
            Ok(Ok(_status)) => return,
            Ok(Err(e)) => tracing::warn!("graceful_shutdown wait failed for PID {pid}: {e}"),
            Err(_) => tracing::warn!("PID {pid} ignored SIGTERM for {GRACE_PERIOD:?}"),
        },
        Err(reason) => tracing::warn!("Failed to send SIGTERM to PID {pid}: {reason}"),
    }

    force_kill(child).await;
}

/// Windows: immediate termination, no graceful shutdown for console processes.
#[cfg(windows)]
async fn graceful_shutdown(child: &mut Child, _pid: u32) {
    force_kill(child).await;
}
