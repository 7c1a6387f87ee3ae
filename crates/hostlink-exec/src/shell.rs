//! Bounded-time subprocess execution through the host shell.

use hostlink_core::{Error, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Captured output of a completed command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Stdout, with stderr appended under a `STDERR:` marker when present.
    pub output: String,
    pub exit_code: i32,
}

/// Runs authorized commands through the host shell with a hard deadline.
///
/// PowerShell on Windows with profile loading and interactivity disabled,
/// `sh -c` elsewhere.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    timeout: Duration,
}

impl ShellRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn run(&self, command_line: &str) -> Result<ExecOutput> {
        let mut command = host_shell(command_line);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| Error::CommandSpawn(e.to_string()))?;

        let mut stdout_pipe = child.stdout.take().unwrap();
        let mut stderr_pipe = child.stderr.take().unwrap();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout_pipe.read_to_end(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf).await;
            buf
        });

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(waited) => waited.map_err(|e| Error::CommandSpawn(e.to_string()))?,
            Err(_) => {
                warn!(timeout = ?self.timeout, "Command timed out, killing process");
                let _ = child.kill().await;
                return Err(Error::CommandTimeout(self.timeout));
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let exit_code = status.code().unwrap_or(-1);

        let mut output = String::from_utf8_lossy(&stdout).into_owned();
        if !stderr.is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str("STDERR:\n");
            output.push_str(&String::from_utf8_lossy(&stderr));
        }

        debug!(exit_code, bytes = output.len(), "Command completed");

        if exit_code != 0 {
            return Err(Error::CommandExit { exit_code, output });
        }

        Ok(ExecOutput { output, exit_code })
    }
}

#[cfg(windows)]
fn host_shell(command_line: &str) -> Command {
    let mut command = Command::new("powershell.exe");
    command
        .arg("-NoProfile")
        .arg("-NonInteractive")
        .arg("-ExecutionPolicy")
        .arg("Bypass")
        .arg("-Command")
        .arg(command_line);
    command
}

#[cfg(not(windows))]
fn host_shell(command_line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line);
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ShellRunner {
        ShellRunner::new(Duration::from_secs(5))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_command_returns_stdout() {
        let result = runner().run("echo hello").await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output.trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_carries_code_and_output() {
        let err = runner().run("echo partial; exit 3").await.unwrap_err();
        match err {
            Error::CommandExit { exit_code, output } => {
                assert_eq!(exit_code, 3);
                assert_eq!(output.trim(), "partial");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_is_marked_in_output() {
        let err = runner().run("echo out; echo err 1>&2; exit 1").await.unwrap_err();
        match err {
            Error::CommandExit { output, .. } => {
                assert!(output.starts_with("out\n"));
                assert!(output.contains("STDERR:\nerr"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_the_child() {
        let runner = ShellRunner::new(Duration::from_millis(100));
        let started = std::time::Instant::now();
        let err = runner.run("sleep 10").await.unwrap_err();
        assert!(matches!(err, Error::CommandTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_only_output_still_has_marker() {
        let err = runner().run("echo oops 1>&2; exit 2").await.unwrap_err();
        match err {
            Error::CommandExit { output, .. } => {
                assert!(output.starts_with("STDERR:\n"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
