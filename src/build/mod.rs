//! Compiling the proxy from its source tree.
//!
//! The build always writes to a staging path next to the installed binary,
//! never over it, and stamps the revision into the binary via `-ldflags`
//! plus a [`BuildStamp`] sidecar.

use crate::constants::{BUILD_PACKAGE, BUILD_TIMEOUT};
use crate::core::ProxyctlError;
use crate::git::SourceRevision;
use crate::utils::{ensure_dir, platform::find_command};
use crate::version::BuildStamp;
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lines of compiler output kept in a [`ProxyctlError::BuildFailed`].
const FAILURE_TAIL_LINES: usize = 20;

#[async_trait]
pub trait Builder: Send + Sync {
    /// Build `source_dir` into `output` and stamp it.
    async fn build(&self, source_dir: &Path, output: &Path, stamp: &BuildStamp) -> Result<()>;
}

/// Stamp describing a build of `rev` made now.
#[must_use]
pub fn stamp_for(rev: &SourceRevision) -> BuildStamp {
    BuildStamp {
        version: rev.version.clone(),
        commit: rev.commit.clone(),
        build_date: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    }
}

/// `-ldflags` value injecting the stamp into the proxy's `main` package.
#[must_use]
pub fn ldflags(stamp: &BuildStamp) -> String {
    format!(
        "-s -w -X main.Version={} -X main.Commit={} -X main.BuildDate={}",
        stamp.version, stamp.commit, stamp.build_date
    )
}

/// `go build` of the proxy entry point.
#[derive(Debug, Clone)]
pub struct GoBuilder {
    go: Option<PathBuf>,
    package: String,
    timeout: Duration,
}

impl Default for GoBuilder {
    fn default() -> Self {
        Self {
            go: None,
            package: BUILD_PACKAGE.to_string(),
            timeout: BUILD_TIMEOUT,
        }
    }
}

impl GoBuilder {
    /// Use a specific `go` executable instead of the one on `PATH`.
    #[must_use]
    pub fn with_go(mut self, go: impl Into<PathBuf>) -> Self {
        self.go = Some(go.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn go(&self) -> Result<PathBuf> {
        self.go.clone().or_else(|| find_command("go")).ok_or_else(|| {
            ProxyctlError::ToolNotFound {
                tool: "go".into(),
            }
            .into()
        })
    }
}

#[async_trait]
impl Builder for GoBuilder {
    async fn build(&self, source_dir: &Path, output: &Path, stamp: &BuildStamp) -> Result<()> {
        let go = self.go()?;
        if let Some(dir) = output.parent() {
            ensure_dir(dir)?;
        }
        if output.exists() {
            tokio::fs::remove_file(output).await?;
        }

        let flags = ldflags(stamp);
        tracing::debug!(
            "({}) go build -o {} -ldflags \"{flags}\" {}",
            source_dir.display(),
            output.display(),
            self.package
        );
        let mut cmd = tokio::process::Command::new(&go);
        cmd.arg("build")
            .arg("-o")
            .arg(output)
            .arg("-ldflags")
            .arg(&flags)
            .arg(&self.package)
            .current_dir(source_dir)
            .env("CGO_ENABLED", "0")
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        let result = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result,
            Err(_) => {
                return Err(ProxyctlError::BuildFailed {
                    reason: format!("go build timed out after {}s", self.timeout.as_secs()),
                }
                .into());
            }
        };
        let out = result.map_err(|e| ProxyctlError::BuildFailed {
            reason: format!("failed to run {}: {e}", go.display()),
        })?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(ProxyctlError::BuildFailed {
                reason: tail_lines(&stderr, FAILURE_TAIL_LINES),
            }
            .into());
        }
        if !output.is_file() {
            return Err(ProxyctlError::BuildFailed {
                reason: format!("go build produced no binary at {}", output.display()),
            }
            .into());
        }

        stamp.write(output)?;
        tracing::info!("built {} ({})", stamp.version, stamp.commit);
        Ok(())
    }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}
