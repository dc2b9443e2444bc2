//! The proxy source checkout.
//!
//! proxyctl always tracks the remote mainline: [`GitRepo::sync_to_remote`]
//! fetches the branch, hard-resets to `origin/<branch>` and removes untracked
//! files, so local edits in `source/` never survive an update. The source
//! version is `git describe --tags --always` of `HEAD`, the same string that
//! is stamped into the binary at build time.
//!
//! All commands go through [`GitCommand`] (system git, never a library).

pub mod command_builder;


use crate::core::ProxyctlError;
use crate::utils::command_exists;
use anyhow::{Context, Result};
use command_builder::GitCommand;
use std::path::{Path, PathBuf};

pub use command_builder::GitCommandOutput;

/// Handle to a local clone.
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
}

/// Identity of a source revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRevision {
    /// `git describe --tags --always`
    pub version: String,
    /// Abbreviated commit hash
    pub commit: String,
}

impl GitRepo {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_git_repo(&self) -> bool {
        self.path.join(".git").exists()
    }

    /// Clone `url` at `branch` into `target`.
    pub async fn clone(url: &str, branch: &str, target: impl AsRef<Path>) -> Result<Self> {
        let target = target.as_ref();
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tracing::info!("cloning {url} ({branch}) into {}", target.display());
        GitCommand::clone(url, branch, target).execute_success().await?;
        Ok(Self::new(target))
    }

    /// Point `origin` at `url` if it currently points elsewhere.
    pub async fn ensure_remote(&self, url: &str) -> Result<()> {
        let current = GitCommand::remote_url().current_dir(&self.path).execute_stdout().await?;
        if current != url {
            tracing::info!("switching origin from {current} to {url}");
            GitCommand::set_remote_url(url).current_dir(&self.path).execute_success().await?;
        }
        Ok(())
    }

    /// `git fetch origin <branch>`, nothing else.
    pub async fn fetch(&self, branch: &str) -> Result<()> {
        GitCommand::fetch_branch(branch).current_dir(&self.path).execute_success().await
    }

    /// Fetch, hard reset to `origin/<branch>`, and remove untracked files.
    pub async fn sync_to_remote(&self, branch: &str) -> Result<()> {
        self.fetch(branch).await?;
        GitCommand::reset_hard_to_remote(branch).current_dir(&self.path).execute_success().await?;
        GitCommand::clean().current_dir(&self.path).execute_success().await
    }

    /// Revision of `rev` (e.g. `HEAD`, `origin/main`).
    pub async fn revision(&self, rev: &str) -> Result<SourceRevision> {
        let version = GitCommand::describe(rev).current_dir(&self.path).execute_stdout().await?;
        let commit = GitCommand::short_commit(rev).current_dir(&self.path).execute_stdout().await?;
        Ok(SourceRevision {
            version,
            commit,
        })
    }

    /// Revision of the checked-out `HEAD`.
    pub async fn head(&self) -> Result<SourceRevision> {
        self.revision("HEAD").await
    }

    /// Revision of `origin/<branch>` as of the last fetch.
    pub async fn remote_head(&self, branch: &str) -> Result<SourceRevision> {
        self.revision(&format!("origin/{branch}")).await
    }
}

/// Fail with [`ProxyctlError::ToolNotFound`] when git is not on PATH.
pub fn ensure_git_available() -> Result<()> {
    if !command_exists("git") {
        return Err(ProxyctlError::ToolNotFound {
            tool: "git".into(),
        }
        .into());
    }
    Ok(())
}
