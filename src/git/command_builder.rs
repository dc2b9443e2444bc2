//! Builder for git invocations against the proxy source checkout.
//!
//! All git calls go through [`GitCommand`], which gives them a uniform shape:
//! `-C <dir>` instead of changing the process working directory, captured
//! output, a timeout, and [`ProxyctlError::GitCommandError`] on failure with
//! the operation name and stderr attached.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::constants::GIT_FETCH_TIMEOUT;
use crate::core::ProxyctlError;

/// Default timeout for local git operations (status, rev-parse, reset).
const LOCAL_GIT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct GitCommand {
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    env_vars: Vec<(String, String)>,
    timeout_duration: Duration,
}

impl Default for GitCommand {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            current_dir: None,
            // Never wait for credential prompts in unattended runs
            env_vars: vec![("GIT_TERMINAL_PROMPT".into(), "0".into())],
            timeout_duration: LOCAL_GIT_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub struct GitCommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl GitCommand {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run git against `dir` (`git -C <dir> ...`).
    #[must_use]
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout_duration = duration;
        self
    }

    /// The git subcommand (first argument), used in error reports.
    fn operation(&self) -> String {
        self.args.first().cloned().unwrap_or_else(|| "unknown".to_string())
    }

    pub async fn execute(self) -> Result<GitCommandOutput> {
        let start = std::time::Instant::now();
        let mut full_args = Vec::new();
        if let Some(dir) = &self.current_dir {
            full_args.push("-C".to_string());
            full_args.push(dir.display().to_string());
        }
        full_args.extend(self.args.iter().cloned());

        tracing::debug!(target: "git", "Executing command: git {}", full_args.join(" "));

        let mut cmd = Command::new("git");
        cmd.args(&full_args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        let output = match timeout(self.timeout_duration, cmd.output()).await {
            Ok(result) => result.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    anyhow::Error::from(ProxyctlError::ToolNotFound {
                        tool: "git".into(),
                    })
                } else {
                    anyhow::Error::from(e).context(format!("Failed to execute git {}", full_args.join(" ")))
                }
            })?,
            Err(_) => {
                tracing::warn!(
                    target: "git",
                    "Command timed out after {} seconds: git {}",
                    self.timeout_duration.as_secs(),
                    full_args.join(" ")
                );
                return Err(ProxyctlError::GitCommandError {
                    operation: self.operation(),
                    stderr: format!(
                        "timed out after {} seconds; try running 'git {}' manually",
                        self.timeout_duration.as_secs(),
                        full_args.join(" ")
                    ),
                }
                .into());
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            tracing::debug!(
                target: "git",
                "Command failed with exit code {:?}: {}",
                output.status.code(),
                stderr.trim()
            );
            return Err(ProxyctlError::GitCommandError {
                operation: self.args.join(" "),
                stderr: if stderr.trim().is_empty() { stdout } else { stderr },
            }
            .into());
        }

        if !stderr.trim().is_empty() {
            tracing::trace!(target: "git", "{}", stderr.trim());
        }
        let elapsed = start.elapsed();
        if elapsed.as_secs() > 1 {
            tracing::debug!(target: "git::perf", "git {} took {:.2}s", self.operation(), elapsed.as_secs_f64());
        }

        Ok(GitCommandOutput {
            stdout,
            stderr,
        })
    }

    /// Execute and return trimmed stdout.
    pub async fn execute_stdout(self) -> Result<String> {
        let output = self.execute().await?;
        Ok(output.stdout.trim().to_string())
    }

    pub async fn execute_success(self) -> Result<()> {
        self.execute().await.map(|_| ())
    }
}

// Convenience builders for the operations the control plane needs

impl GitCommand {
    /// `git clone --branch <branch> <url> <target>`
    pub fn clone(url: &str, branch: &str, target: impl AsRef<Path>) -> Self {
        Self::new()
            .args(["clone", "--branch", branch, url])
            .arg(target.as_ref().display().to_string())
            .with_timeout(GIT_FETCH_TIMEOUT)
    }

    /// `git fetch --tags --force origin <branch>`
    pub fn fetch_branch(branch: &str) -> Self {
        Self::new().args(["fetch", "--tags", "--force", "origin", branch]).with_timeout(GIT_FETCH_TIMEOUT)
    }

    /// `git reset --hard origin/<branch>`
    pub fn reset_hard_to_remote(branch: &str) -> Self {
        Self::new().args(["reset", "--hard", &format!("origin/{branch}")])
    }

    /// `git clean -fd`
    pub fn clean() -> Self {
        Self::new().args(["clean", "-fd"])
    }

    /// `git describe --tags --always <rev>`
    pub fn describe(rev: &str) -> Self {
        Self::new().args(["describe", "--tags", "--always", rev])
    }

    /// `git rev-parse --short <rev>`
    pub fn short_commit(rev: &str) -> Self {
        Self::new().args(["rev-parse", "--short", rev])
    }

    pub fn remote_url() -> Self {
        Self::new().args(["remote", "get-url", "origin"])
    }

    pub fn set_remote_url(url: &str) -> Self {
        Self::new().args(["remote", "set-url", "origin", url])
    }
}
