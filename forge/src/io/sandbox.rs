//! Allow-listed command execution for validation checks.
//!
//! Commands are checked against the allow-list by base name before any process
//! is spawned; unlisted commands fail closed. Output capture is bounded and a
//! timeout kills the child and reports a retryable failure.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::config::{SandboxConfig, ValidationConfig};
use crate::io::process::run_with_timeout;
use crate::io::result::{ToolErrorCode, ToolResult};

/// Result payload of a sandboxed command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub command: String,
}

/// Gateway for running allow-listed commands in a working directory.
#[derive(Debug, Clone)]
pub struct Sandbox {
    allowed_commands: Vec<String>,
    default_timeout: Duration,
    output_limit_bytes: usize,
    lint_command: Vec<String>,
    test_command: Vec<String>,
    test_timeout: Duration,
}

impl Sandbox {
    pub fn new(sandbox: &SandboxConfig, validation: &ValidationConfig) -> Self {
        Self {
            allowed_commands: sandbox.allowed_commands.clone(),
            default_timeout: Duration::from_secs(sandbox.timeout_secs),
            output_limit_bytes: sandbox.output_limit_bytes,
            lint_command: validation.lint_command.clone(),
            test_command: validation.test_command.clone(),
            test_timeout: Duration::from_secs(validation.test_timeout_secs),
        }
    }

    /// Run a command in `cwd`, subject to the allow-list and a timeout.
    #[instrument(skip_all, fields(command = command.first().map(String::as_str).unwrap_or("")))]
    pub async fn run(
        &self,
        command: &[String],
        cwd: &Path,
        timeout: Option<Duration>,
    ) -> ToolResult<CommandResult> {
        let started = Instant::now();
        let Some(program) = command.first() else {
            return ToolResult::err(ToolErrorCode::EmptyCommand, "command is empty", started);
        };
        let base = Path::new(program)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| program.clone());
        if !self.allowed_commands.iter().any(|allowed| *allowed == base) {
            warn!(command = %base, "command not in allow-list");
            return ToolResult::err(
                ToolErrorCode::CommandNotAllowed,
                format!(
                    "command '{base}' is not in allow-list: {:?}",
                    self.allowed_commands
                ),
                started,
            );
        }
        if !cwd.is_dir() {
            return ToolResult::err(
                ToolErrorCode::InvalidCwd,
                format!("working directory does not exist: {}", cwd.display()),
                started,
            );
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        let mut cmd = Command::new(program);
        cmd.args(&command[1..]).current_dir(cwd);
        let rendered = command.join(" ");

        let output = match run_with_timeout(cmd, timeout, self.output_limit_bytes).await {
            Ok(output) => output,
            Err(err) => {
                return ToolResult::err(ToolErrorCode::ExecutionError, err.to_string(), started);
            }
        };

        let result = CommandResult {
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
            exit_code: output.exit_code(),
            command: rendered,
        };
        if output.timed_out {
            return ToolResult::err_with_data(
                ToolErrorCode::CommandTimeout,
                format!("command timed out after {}s", timeout.as_secs()),
                result,
                started,
            );
        }
        if !output.success() {
            let message = if result.stderr.trim().is_empty() {
                format!("command exited with {:?}", result.exit_code)
            } else {
                result.stderr.trim().to_string()
            };
            return ToolResult::err_with_data(
                ToolErrorCode::CommandFailed,
                message,
                result,
                started,
            );
        }
        debug!(exit_code = ?result.exit_code, "command succeeded");
        ToolResult::ok(result, started)
    }

    /// Run the configured lint check.
    pub async fn run_lint(&self, cwd: &Path) -> ToolResult<CommandResult> {
        self.run(&self.lint_command, cwd, None).await
    }

    /// Run the configured test check with the test timeout.
    pub async fn run_tests(&self, cwd: &Path) -> ToolResult<CommandResult> {
        self.run(&self.test_command, cwd, Some(self.test_timeout)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox_allowing(commands: &[&str]) -> Sandbox {
        let sandbox_config = SandboxConfig {
            allowed_commands: commands.iter().map(|s| s.to_string()).collect(),
            ..SandboxConfig::default()
        };
        Sandbox::new(&sandbox_config, &ValidationConfig::default())
    }

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    /// A disallowed command fails closed before any process is spawned.
    #[tokio::test]
    async fn disallowed_command_fails_closed() {
        let sandbox = sandbox_allowing(&["echo"]);
        let temp = tempfile::tempdir().expect("tempdir");
        let result = sandbox.run(&cmd(&["rm", "-rf", "/"]), temp.path(), None).await;
        assert_eq!(result.error_code(), Some(ToolErrorCode::CommandNotAllowed));
        assert!(!result.is_retryable());
        assert!(result.data.is_none());
    }

    /// Absolute paths cannot smuggle a disallowed base command.
    #[tokio::test]
    async fn allow_list_compares_base_name() {
        let sandbox = sandbox_allowing(&["echo"]);
        let temp = tempfile::tempdir().expect("tempdir");
        let result = sandbox.run(&cmd(&["/bin/rm", "-rf", "/"]), temp.path(), None).await;
        assert_eq!(result.error_code(), Some(ToolErrorCode::CommandNotAllowed));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let sandbox = sandbox_allowing(&["echo"]);
        let temp = tempfile::tempdir().expect("tempdir");
        let result = sandbox.run(&[], temp.path(), None).await;
        assert_eq!(result.error_code(), Some(ToolErrorCode::EmptyCommand));
    }

    #[tokio::test]
    async fn successful_command_captures_output() {
        let sandbox = sandbox_allowing(&["echo"]);
        let temp = tempfile::tempdir().expect("tempdir");
        let result = sandbox.run(&cmd(&["echo", "ok"]), temp.path(), None).await;
        assert!(result.ok);
        let data = result.into_data().expect("data");
        assert_eq!(data.stdout.trim(), "ok");
        assert_eq!(data.exit_code, Some(0));
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code_with_output() {
        let sandbox = sandbox_allowing(&["false"]);
        let temp = tempfile::tempdir().expect("tempdir");
        let result = sandbox.run(&cmd(&["false"]), temp.path(), None).await;
        assert!(!result.ok);
        assert_eq!(result.error_code(), Some(ToolErrorCode::CommandFailed));
        assert_eq!(result.into_data().expect("data").exit_code, Some(1));
    }

    #[tokio::test]
    async fn timeout_is_retryable() {
        let sandbox = sandbox_allowing(&["sleep"]);
        let temp = tempfile::tempdir().expect("tempdir");
        let result = sandbox
            .run(&cmd(&["sleep", "30"]), temp.path(), Some(Duration::from_millis(100)))
            .await;
        assert_eq!(result.error_code(), Some(ToolErrorCode::CommandTimeout));
        assert!(result.is_retryable());
    }
}
