//! Version-control gateway.
//!
//! A small, explicit wrapper around `git` subprocess calls. Metadata commands
//! run with a short timeout; commit and diff get a longer one. All failures
//! are reported through the [`ToolResult`] envelope.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::io::process::{CapturedOutput, run_with_timeout};
use crate::io::result::{ToolErrorCode, ToolResult};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const COMMIT_TIMEOUT: Duration = Duration::from_secs(30);
const DIFF_TIMEOUT: Duration = Duration::from_secs(30);
const OUTPUT_LIMIT: usize = 1024 * 1024;

/// Parsed `git status --porcelain` summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GitStatus {
    pub branch: String,
    pub modified: Vec<String>,
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    pub untracked: Vec<String>,
    pub is_clean: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchCreated {
    pub branch: String,
    pub checked_out: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    pub committed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffOutcome {
    pub diff: String,
    pub stats: String,
    pub has_changes: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub hash: String,
    pub message: String,
    pub author: String,
    pub date: String,
}

/// Wrapper for executing git commands in a repository.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn not_a_repo(&self) -> bool {
        !self.workdir.join(".git").is_dir()
    }

    async fn run_git(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CapturedOutput, (ToolErrorCode, String)> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        let output = run_with_timeout(cmd, timeout, OUTPUT_LIMIT)
            .await
            .map_err(|err| {
                (
                    ToolErrorCode::GitError,
                    format!("git {}: {err}", args.join(" ")),
                )
            })?;
        if output.timed_out {
            warn!(args = args.join(" "), "git command timed out");
            return Err((ToolErrorCode::GitTimeout, "git command timed out".into()));
        }
        Ok(output)
    }

    /// Get the current branch and working-tree change summary.
    #[instrument(skip_all)]
    pub async fn status(&self) -> ToolResult<GitStatus> {
        let started = Instant::now();
        if self.not_a_repo() {
            return not_a_git_repo(started);
        }
        let branch = match self
            .run_git(&["branch", "--show-current"], METADATA_TIMEOUT)
            .await
        {
            Ok(out) => out.stdout_lossy().trim().to_string(),
            Err((code, msg)) => return ToolResult::err(code, msg, started),
        };
        let porcelain = match self.run_git(&["status", "--porcelain"], METADATA_TIMEOUT).await {
            Ok(out) => out.stdout_lossy(),
            Err((code, msg)) => return ToolResult::err(code, msg, started),
        };

        let mut status = GitStatus {
            branch,
            is_clean: porcelain.trim().is_empty(),
            ..GitStatus::default()
        };
        for line in porcelain.lines() {
            if line.len() < 4 {
                continue;
            }
            let code = &line[..2];
            let path = line[3..].trim().to_string();
            if code == "??" {
                status.untracked.push(path);
            } else if code.starts_with('A') {
                status.added.push(path);
            } else if code.starts_with('D') {
                status.deleted.push(path);
            } else if code.contains('M') {
                status.modified.push(path);
            }
        }
        debug!(branch = %status.branch, is_clean = status.is_clean, "git status");
        ToolResult::ok(status, started)
    }

    /// Create a new branch, optionally checking it out.
    ///
    /// Branch names are sanitized: spaces and slashes become dashes.
    #[instrument(skip_all, fields(branch = branch_name))]
    pub async fn create_branch(&self, branch_name: &str, checkout: bool) -> ToolResult<BranchCreated> {
        let started = Instant::now();
        if self.not_a_repo() {
            return not_a_git_repo(started);
        }
        let branch = branch_name.replace([' ', '/'], "-");
        let args: Vec<&str> = if checkout {
            vec!["checkout", "-b", &branch]
        } else {
            vec!["branch", &branch]
        };
        match self.run_git(&args, METADATA_TIMEOUT).await {
            Ok(out) if out.success() => {
                debug!(branch = %branch, checkout, "created branch");
                ToolResult::ok(
                    BranchCreated {
                        branch,
                        checked_out: checkout,
                    },
                    started,
                )
            }
            Ok(out) => ToolResult::err(
                ToolErrorCode::BranchCreateFailed,
                out.stderr_lossy().trim().to_string(),
                started,
            ),
            Err((code, msg)) => ToolResult::err(code, msg, started),
        }
    }

    /// Stage and commit changes. "Nothing to commit" is success with
    /// `committed = false`.
    #[instrument(skip_all)]
    pub async fn commit(&self, message: &str, add_all: bool) -> ToolResult<CommitOutcome> {
        let started = Instant::now();
        if self.not_a_repo() {
            return not_a_git_repo(started);
        }
        if add_all {
            match self.run_git(&["add", "-A"], METADATA_TIMEOUT).await {
                Ok(out) if out.success() => {}
                Ok(out) => {
                    return ToolResult::err(
                        ToolErrorCode::GitError,
                        out.stderr_lossy().trim().to_string(),
                        started,
                    );
                }
                Err((code, msg)) => return ToolResult::err(code, msg, started),
            }
        }
        let commit = match self.run_git(&["commit", "-m", message], COMMIT_TIMEOUT).await {
            Ok(out) => out,
            Err((code, msg)) => return ToolResult::err(code, msg, started),
        };
        if !commit.success() {
            if commit.stdout_lossy().contains("nothing to commit") {
                debug!("nothing to commit");
                return ToolResult::ok(
                    CommitOutcome {
                        committed: false,
                        commit_hash: None,
                        message: message.to_string(),
                    },
                    started,
                );
            }
            return ToolResult::err(
                ToolErrorCode::GitCommitFailed,
                commit.stderr_lossy().trim().to_string(),
                started,
            );
        }
        let hash = match self.run_git(&["rev-parse", "HEAD"], METADATA_TIMEOUT).await {
            Ok(out) => out.stdout_lossy().trim().chars().take(8).collect::<String>(),
            Err((code, msg)) => return ToolResult::err(code, msg, started),
        };
        debug!(hash = %hash, "committed");
        ToolResult::ok(
            CommitOutcome {
                committed: true,
                commit_hash: Some(hash),
                message: message.to_string(),
            },
            started,
        )
    }

    /// Get the diff of current changes, optionally staged-only or per-file.
    #[instrument(skip_all)]
    pub async fn diff(&self, staged: bool, file: Option<&str>) -> ToolResult<DiffOutcome> {
        let started = Instant::now();
        if self.not_a_repo() {
            return not_a_git_repo(started);
        }
        let mut args = vec!["diff"];
        if staged {
            args.push("--staged");
        }
        if let Some(file) = file {
            args.push("--");
            args.push(file);
        }
        let diff = match self.run_git(&args, DIFF_TIMEOUT).await {
            Ok(out) => out.stdout_lossy(),
            Err((code, msg)) => return ToolResult::err(code, msg, started),
        };
        let mut stat_args = args.clone();
        stat_args.push("--stat");
        let stats = match self.run_git(&stat_args, METADATA_TIMEOUT).await {
            Ok(out) => out.stdout_lossy().trim().to_string(),
            Err((code, msg)) => return ToolResult::err(code, msg, started),
        };
        let has_changes = !diff.trim().is_empty();
        ToolResult::ok(
            DiffOutcome {
                diff,
                stats,
                has_changes,
            },
            started,
        )
    }

    /// Get recent commits, newest first.
    #[instrument(skip_all, fields(max_commits))]
    pub async fn log(&self, max_commits: usize) -> ToolResult<Vec<LogEntry>> {
        let started = Instant::now();
        if self.not_a_repo() {
            return not_a_git_repo(started);
        }
        let count = format!("-{max_commits}");
        let out = match self
            .run_git(
                &["log", &count, "--format=%H|%s|%an|%ad", "--date=short"],
                METADATA_TIMEOUT,
            )
            .await
        {
            Ok(out) => out,
            Err((code, msg)) => return ToolResult::err(code, msg, started),
        };
        let mut commits = Vec::new();
        for line in out.stdout_lossy().lines() {
            let parts: Vec<&str> = line.splitn(4, '|').collect();
            if parts.len() == 4 {
                commits.push(LogEntry {
                    hash: parts[0].chars().take(8).collect(),
                    message: parts[1].to_string(),
                    author: parts[2].to_string(),
                    date: parts[3].to_string(),
                });
            }
        }
        ToolResult::ok(commits, started)
    }
}

fn not_a_git_repo<T>(started: Instant) -> ToolResult<T> {
    ToolResult::err(
        ToolErrorCode::NotAGitRepo,
        "directory is not a git repository",
        started,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[tokio::test]
    async fn status_outside_repo_reports_not_a_git_repo() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        let status = git.status().await;
        assert_eq!(status.error_code(), Some(ToolErrorCode::NotAGitRepo));
    }

    /// Branch creation sanitizes separators and checks the branch out.
    #[tokio::test]
    async fn create_branch_sanitizes_name() {
        let repo = TestRepo::new();
        let git = Git::new(repo.root());
        let created = git
            .create_branch("forge/abc 123", true)
            .await
            .into_data()
            .expect("data");
        assert_eq!(created.branch, "forge-abc-123");

        let status = git.status().await.into_data().expect("data");
        assert_eq!(status.branch, "forge-abc-123");
    }

    #[tokio::test]
    async fn commit_with_no_changes_is_ok_but_not_committed() {
        let repo = TestRepo::new();
        let git = Git::new(repo.root());
        let outcome = git
            .commit("chore: empty", true)
            .await
            .into_data()
            .expect("data");
        assert!(!outcome.committed);
        assert!(outcome.commit_hash.is_none());
    }

    #[tokio::test]
    async fn commit_then_log_and_diff() {
        let repo = TestRepo::new();
        let git = Git::new(repo.root());

        std::fs::write(repo.root().join("new.txt"), "hello\n").expect("write");
        let outcome = git
            .commit("feat: add new file", true)
            .await
            .into_data()
            .expect("data");
        assert!(outcome.committed);
        assert_eq!(outcome.commit_hash.as_deref().map(str::len), Some(8));

        let log = git.log(5).await.into_data().expect("data");
        assert_eq!(log[0].message, "feat: add new file");

        std::fs::write(repo.root().join("new.txt"), "hello world\n").expect("write");
        let diff = git.diff(false, None).await.into_data().expect("data");
        assert!(diff.has_changes);
        assert!(diff.diff.contains("hello world"));
    }
}
