//! Commit-history sources for file drift.
//!
//! The staleness scorer only consumes counts; where they come from is behind
//! [`CommitHistory`].

use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Count of commits touching a set of files since a date
pub trait CommitHistory: Send + Sync {
    /// `None` when the history cannot be queried
    fn commits_touching(&self, files: &[String], since: NaiveDate) -> Option<u32>;
}

/// `git log` against a repository checkout
#[derive(Debug, Clone)]
pub struct GitHistory {
    repo_root: PathBuf,
}

impl GitHistory {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }
}

/// `--since` bound at the start of the day; a bare date means that date at
/// the current time of day to git
fn since_arg(since: NaiveDate) -> String {
    format!("--since={} 00:00:00", since.format("%Y-%m-%d"))
}

impl CommitHistory for GitHistory {
    fn commits_touching(&self, files: &[String], since: NaiveDate) -> Option<u32> {
        if files.is_empty() {
            return None;
        }

        let since_arg = since_arg(since);
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_root)
            .args(["log", &since_arg, "--format=%H", "--"])
            .args(files)
            // Never wait on a credential prompt
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GCM_INTERACTIVE", "never")
            .output();

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!(error = %e, "failed to run git");
                return None;
            }
        };
        if !output.status.success() {
            tracing::debug!(
                repo = %self.repo_root.display(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "git log failed"
            );
            return None;
        }

        let count = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count();
        Some(count as u32)
    }
}

/// One commit in a [`StaticHistory`]
#[derive(Debug, Clone)]
pub struct StaticCommit {
    pub date: NaiveDate,
    pub files: Vec<String>,
}

/// Fixed in-memory history
#[derive(Debug, Clone, Default)]
pub struct StaticHistory {
    commits: Vec<StaticCommit>,
    unavailable: bool,
}

impl StaticHistory {
    pub fn new(commits: Vec<StaticCommit>) -> Self {
        Self {
            commits,
            unavailable: false,
        }
    }

    /// A history whose every query fails
    pub fn unavailable() -> Self {
        Self {
            commits: Vec::new(),
            unavailable: true,
        }
    }

    pub fn push(&mut self, date: NaiveDate, files: &[&str]) {
        self.commits.push(StaticCommit {
            date,
            files: files.iter().map(|f| f.to_string()).collect(),
        });
    }
}

impl CommitHistory for StaticHistory {
    fn commits_touching(&self, files: &[String], since: NaiveDate) -> Option<u32> {
        if self.unavailable {
            return None;
        }
        let count = self
            .commits
            .iter()
            .filter(|c| c.date >= since && c.files.iter().any(|f| files.contains(f)))
            .count();
        Some(count as u32)
    }
}
