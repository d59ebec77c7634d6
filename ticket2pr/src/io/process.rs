//! Helpers for running child processes with timeouts, cancellation and bounded output.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::io::signals::CancelToken;

/// How often a running child is checked for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Limits applied to one child process.
#[derive(Debug, Clone)]
pub struct ProcessLimits {
    pub timeout: Duration,
    /// Bytes of stdout/stderr kept in memory; the rest is drained and counted.
    pub output_limit_bytes: usize,
    pub cancel: Option<CancelToken>,
}

impl ProcessLimits {
    pub fn new(timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            timeout,
            output_limit_bytes,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success() && !self.timed_out && !self.cancelled
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Stdout and stderr combined into one human-readable block.
    pub fn combined(&self, label: &str) -> String {
        let mut buf = String::new();
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        if !self.stderr.is_empty() {
            if !buf.is_empty() && !buf.ends_with('\n') {
                buf.push('\n');
            }
            buf.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        if self.timed_out {
            buf.push_str(&format!("\n[{label} timed out]\n"));
        }
        if self.cancelled {
            buf.push_str(&format!("\n[{label} cancelled]\n"));
        }
        buf
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. The child is killed when the
/// timeout elapses or the cancel token fires; either is reported in the output
/// rather than as an error.
#[instrument(
    skip_all,
    fields(
        timeout_secs = limits.timeout.as_secs(),
        output_limit_bytes = limits.output_limit_bytes
    )
)]
pub fn run_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    limits: &ProcessLimits,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = limits.output_limit_bytes;
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, limit));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, limit));

    let deadline = Instant::now() + limits.timeout;
    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        let now = Instant::now();
        if now >= deadline {
            warn!(
                timeout_secs = limits.timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            break kill_and_wait(&mut child)?;
        }
        if limits.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            warn!("run cancelled, killing command");
            cancelled = true;
            break kill_and_wait(&mut child)?;
        }
        let slice = POLL_INTERVAL.min(deadline - now);
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            break status;
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, cancelled, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        cancelled,
    })
}

fn kill_and_wait(child: &mut std::process::Child) -> Result<ExitStatus> {
    // The child may have exited between the last poll and the kill.
    if let Err(err) = child.kill() {
        debug!(err = %err, "kill failed, child likely already exited");
    }
    child.wait().context("wait command after kill")
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_exit_status() {
        let limits = ProcessLimits::new(Duration::from_secs(10), 1_000);
        let out = run_command(sh("echo hello; echo oops >&2; exit 3"), None, &limits)
            .expect("run");
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stdout_lossy().trim(), "hello");
        assert_eq!(out.stderr_lossy().trim(), "oops");
        assert!(!out.success());
    }

    #[test]
    fn feeds_stdin() {
        let limits = ProcessLimits::new(Duration::from_secs(10), 1_000);
        let out = run_command(sh("cat"), Some(b"piped"), &limits).expect("run");
        assert!(out.success());
        assert_eq!(out.stdout_lossy(), "piped");
    }

    #[test]
    fn truncates_output_beyond_limit() {
        let limits = ProcessLimits::new(Duration::from_secs(10), 4);
        let out = run_command(sh("printf 0123456789"), None, &limits).expect("run");
        assert_eq!(out.stdout, b"0123");
        assert_eq!(out.stdout_truncated, 6);
        assert!(out.combined("cmd").contains("truncated 6 bytes"));
    }

    #[test]
    fn kills_on_timeout() {
        let limits = ProcessLimits::new(Duration::from_millis(200), 1_000);
        let out = run_command(sh("exec sleep 5"), None, &limits).expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
    }

    /// Verifies a pre-cancelled token kills the child on the first poll.
    #[test]
    fn kills_on_cancel() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let limits = ProcessLimits::new(Duration::from_secs(30), 1_000).with_cancel(cancel);
        let start = Instant::now();
        let out = run_command(sh("exec sleep 5"), None, &limits).expect("run");
        assert!(out.cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
