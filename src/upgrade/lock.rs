//! Exclusive lock serialising `update` and `rollback` per installation.
//!
//! Uses an OS file lock on `<root>/.proxyctl.lock` via [`fs4`]. The lock is
//! released when the [`UpdateLock`] is dropped or the process dies, so a
//! crashed run never leaves the installation locked. The file itself stays.

use crate::core::ProxyctlError;
use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

pub struct UpdateLock {
    file: File,
    path: PathBuf,
}

impl UpdateLock {
    /// Take the lock without waiting; [`ProxyctlError::UpdateInProgress`]
    /// when another invocation holds it.
    pub async fn try_acquire(path: &Path) -> Result<Self> {
        let owned = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || -> Result<Option<File>> {
            if let Some(dir) = owned.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&owned)
                .with_context(|| format!("Failed to open lock file {}", owned.display()))?;
            match file.try_lock_exclusive() {
                Ok(true) => Ok(Some(file)),
                Ok(false) => Ok(None),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(e).with_context(|| format!("Failed to lock {}", owned.display())),
            }
        })
        .await
        .context("spawn_blocking panicked")??;

        match file {
            Some(file) => {
                tracing::debug!("acquired update lock {}", path.display());
                Ok(Self {
                    file,
                    path: path.to_path_buf(),
                })
            }
            None => Err(ProxyctlError::UpdateInProgress {
                path: path.display().to_string(),
            }
            .into()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release update lock {}: {e}", self.path.display());
        }
    }
}
