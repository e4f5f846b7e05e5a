//! Helpers for running child processes with timeouts and bounded output.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Captured child process output.
#[derive(Debug)]
pub struct CapturedOutput {
    /// Exit status; meaningless when `timed_out` is set (the child was killed).
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CapturedOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    pub fn exit_code(&self) -> Option<i32> {
        if self.timed_out {
            None
        } else {
            self.status.code()
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe
/// deadlocks.
///
/// Output is drained concurrently while the child runs. `output_limit_bytes`
/// bounds the amount of stdout/stderr stored in memory (bytes beyond the limit
/// are discarded while still draining the pipe). On timeout the child is
/// killed and `timed_out` is set.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CapturedOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_task = tokio::spawn(read_stream_limited(stdout, output_limit_bytes));
    let stderr_task = tokio::spawn(read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status.context("wait for command")?,
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().await.context("kill command")?;
            child.wait().await.context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = stdout_task.await.context("join stdout")??;
    let (stderr, stderr_truncated) = stderr_task.await.context("join stderr")??;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CapturedOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

async fn read_stream_limited<R>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await.context("read output")?;
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

    #[tokio::test]
    async fn captures_stdout_within_limit() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let out = run_with_timeout(cmd, Duration::from_secs(5), 1000)
            .await
            .expect("run");
        assert!(out.success());
        assert_eq!(out.stdout_lossy().trim(), "hello");
        assert_eq!(out.stdout_truncated, 0);
    }

    #[tokio::test]
    async fn truncates_output_beyond_limit() {
        let mut cmd = Command::new("echo");
        cmd.arg("0123456789");
        let out = run_with_timeout(cmd, Duration::from_secs(5), 4)
            .await
            .expect("run");
        assert_eq!(out.stdout.len(), 4);
        assert!(out.stdout_truncated > 0);
    }

    #[tokio::test]
    async fn kills_child_on_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let out = run_with_timeout(cmd, Duration::from_millis(100), 1000)
            .await
            .expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
    }
}
