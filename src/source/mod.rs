//! The proxy source tree as seen by the update workflow.
//!
//! [`SourceTree`] is the seam between the orchestrator and git: production
//! code uses [`GitSourceTree`], tests substitute an in-memory fake whose
//! revisions can be advanced between runs.

use crate::git::{GitRepo, SourceRevision, ensure_git_available};
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait SourceTree: Send + Sync {
    /// Directory the tree is checked out into.
    fn path(&self) -> &Path;

    /// Clone the tree if it does not exist yet; point `origin` at the
    /// configured URL otherwise.
    async fn ensure(&self) -> Result<()>;

    /// Download the remote branch without touching the working tree.
    async fn fetch(&self) -> Result<()>;

    /// Fetch and hard-reset the working tree to the remote branch.
    async fn sync(&self) -> Result<SourceRevision>;

    /// Revision currently checked out, `None` when there is no checkout.
    async fn current(&self) -> Result<Option<SourceRevision>>;

    /// Revision of the fetched remote branch.
    async fn remote_head(&self) -> Result<Option<SourceRevision>>;
}

#[derive(Debug, Clone)]
pub struct GitSourceTree {
    repo: GitRepo,
    url: String,
    branch: String,
}

impl GitSourceTree {
    pub fn new(path: impl Into<PathBuf>, url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo: GitRepo::new(path.into()),
            url: url.into(),
            branch: branch.into(),
        }
    }

    #[must_use]
    pub fn branch(&self) -> &str {
        &self.branch
    }
}

#[async_trait]
impl SourceTree for GitSourceTree {
    fn path(&self) -> &Path {
        self.repo.path()
    }

    async fn ensure(&self) -> Result<()> {
        ensure_git_available()?;
        if self.repo.is_git_repo() {
            self.repo.ensure_remote(&self.url).await
        } else {
            GitRepo::clone(&self.url, &self.branch, self.repo.path()).await.map(|_| ())
        }
    }

    async fn fetch(&self) -> Result<()> {
        ensure_git_available()?;
        self.repo.fetch(&self.branch).await
    }

    async fn sync(&self) -> Result<SourceRevision> {
        ensure_git_available()?;
        self.repo.ensure_remote(&self.url).await?;
        self.repo.sync_to_remote(&self.branch).await?;
        self.repo.head().await
    }

    async fn current(&self) -> Result<Option<SourceRevision>> {
        if !self.repo.is_git_repo() {
            return Ok(None);
        }
        self.repo.head().await.map(Some)
    }

    async fn remote_head(&self) -> Result<Option<SourceRevision>> {
        if !self.repo.is_git_repo() {
            return Ok(None);
        }
        match self.repo.remote_head(&self.branch).await {
            Ok(rev) => Ok(Some(rev)),
            Err(e) => {
                tracing::debug!(target: "git", "no remote head for {}: {e:#}", self.branch);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestGit;

    #[tokio::test]
    async fn test_missing_checkout_has_no_revision() {
        let temp = tempfile::TempDir::new().unwrap();
        let tree = GitSourceTree::new(temp.path().join("source"), "unused", "main");
        assert_eq!(tree.current().await.unwrap(), None);
        assert_eq!(tree.remote_head().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ensure_clones_then_syncs() {
        if !crate::utils::command_exists("git") {
            return;
        }
        let temp = tempfile::TempDir::new().unwrap();
        let upstream = temp.path().join("upstream");
        std::fs::create_dir_all(&upstream).unwrap();
        let git = TestGit::new(&upstream);
        git.init_on_branch("main").unwrap();
        git.config_user().unwrap();
        std::fs::write(upstream.join("main.go"), "package main\n").unwrap();
        git.add_all().unwrap();
        git.commit("initial").unwrap();
        git.tag("v1.0.0").unwrap();

        let url = upstream.display().to_string();
        let tree = GitSourceTree::new(temp.path().join("source"), &url, "main");
        tree.ensure().await.unwrap();
        assert_eq!(tree.current().await.unwrap().unwrap().version, "v1.0.0");

        std::fs::write(upstream.join("main.go"), "package main // v2\n").unwrap();
        git.add_all().unwrap();
        git.commit("second").unwrap();
        git.tag("v1.1.0").unwrap();

        let synced = tree.sync().await.unwrap();
        assert_eq!(synced.version, "v1.1.0");
        assert_eq!(tree.remote_head().await.unwrap().unwrap().version, "v1.1.0");
    }
}
