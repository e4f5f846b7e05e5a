//! Uniform result envelope for tool gateway operations.
//!
//! Every side-effecting operation (repository access, version control, command
//! execution) returns a [`ToolResult`] instead of propagating errors. Failures
//! carry a code from a fixed vocabulary plus a retryability classification, so
//! workflow steps can degrade gracefully without unwinding the run.

use std::time::Instant;

use serde::Serialize;

/// Fixed error vocabulary for tool gateway failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorCode {
    InvalidPath,
    PathEscape,
    FileNotFound,
    NotAFile,
    FileTooLarge,
    ReadError,
    WriteError,
    SearchError,
    NotAGitRepo,
    GitError,
    GitTimeout,
    BranchCreateFailed,
    GitCommitFailed,
    EmptyCommand,
    CommandNotAllowed,
    InvalidCwd,
    CommandFailed,
    CommandTimeout,
    ExecutionError,
}

impl ToolErrorCode {
    /// Classification policy: process timeouts and transient I/O failures are
    /// retryable; path-safety violations, disallowed commands, and not-found
    /// conditions are not.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ToolErrorCode::ReadError
                | ToolErrorCode::WriteError
                | ToolErrorCode::GitError
                | ToolErrorCode::GitTimeout
                | ToolErrorCode::CommandTimeout
                | ToolErrorCode::ExecutionError
        )
    }
}

/// Failure detail carried by a non-ok [`ToolResult`].
#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub code: ToolErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl ToolError {
    pub fn new(code: ToolErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.retryable(),
        }
    }
}

/// Outcome of one external operation.
///
/// `data` may be present alongside `error` (e.g. a failed command still
/// carries its captured output).
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<ToolError>,
    pub latency_ms: u64,
}

impl<T> ToolResult<T> {
    pub fn ok(data: T, started: Instant) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    pub fn err(code: ToolErrorCode, message: impl Into<String>, started: Instant) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ToolError::new(code, message)),
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Failure that still carries partial data (e.g. a non-zero exit with
    /// captured stdout/stderr).
    pub fn err_with_data(
        code: ToolErrorCode,
        message: impl Into<String>,
        data: T,
        started: Instant,
    ) -> Self {
        Self {
            ok: false,
            data: Some(data),
            error: Some(ToolError::new(code, message)),
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    pub fn error_code(&self) -> Option<ToolErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.retryable)
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    /// Split the envelope for callers that just branch on success.
    pub fn into_outcome(self) -> Result<T, ToolError> {
        match (self.ok, self.data, self.error) {
            (true, Some(data), _) => Ok(data),
            (_, _, Some(error)) => Err(error),
            _ => Err(ToolError::new(
                ToolErrorCode::ExecutionError,
                "missing result payload",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_retryable_safety_violations_are_not() {
        assert!(ToolErrorCode::CommandTimeout.retryable());
        assert!(ToolErrorCode::GitTimeout.retryable());
        assert!(!ToolErrorCode::PathEscape.retryable());
        assert!(!ToolErrorCode::CommandNotAllowed.retryable());
        assert!(!ToolErrorCode::FileNotFound.retryable());
    }

    #[test]
    fn error_codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ToolErrorCode::CommandNotAllowed).expect("serialize");
        assert_eq!(json, "\"COMMAND_NOT_ALLOWED\"");
        let json = serde_json::to_string(&ToolErrorCode::PathEscape).expect("serialize");
        assert_eq!(json, "\"PATH_ESCAPE\"");
    }

    #[test]
    fn err_with_data_keeps_both_sides() {
        let started = Instant::now();
        let result = ToolResult::err_with_data(
            ToolErrorCode::CommandFailed,
            "exit code 1",
            "stderr text",
            started,
        );
        assert!(!result.ok);
        assert_eq!(result.data, Some("stderr text"));
        assert_eq!(result.error_code(), Some(ToolErrorCode::CommandFailed));
    }
}
