//! The binary slots of an installation.
//!
//! Three slots sit side by side in the bin directory: the active binary,
//! `<name>.bak` (the previous binary, kept for rollback) and `<name>.failed`
//! (a binary that failed verification, kept for inspection until the next
//! successful update or rollback). Each binary carries its
//! [`BuildStamp`](crate::version::BuildStamp) sidecar along through every
//! move and copy.

use crate::config::InstallConfig;
use crate::utils::{move_file, set_executable};
use crate::version::BuildStamp;
use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// Attempts made to move the backup into place (Windows may briefly keep
/// the old image locked after the process exits).
const RESTORE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct BackupManager {
    active: PathBuf,
    backup: PathBuf,
    failed: PathBuf,
}

impl BackupManager {
    #[must_use]
    pub fn new(cfg: &InstallConfig) -> Self {
        Self {
            active: cfg.binary_path.clone(),
            backup: cfg.backup_path(),
            failed: cfg.failed_path(),
        }
    }

    #[must_use]
    pub fn backup_exists(&self) -> bool {
        self.backup.is_file()
    }

    #[must_use]
    pub fn backup_path(&self) -> &Path {
        &self.backup
    }

    #[must_use]
    pub fn failed_path(&self) -> &Path {
        &self.failed
    }

    /// Copy the active binary to the backup slot, replacing any older backup.
    ///
    /// Returns `false` when there is no active binary to back up.
    pub async fn create_backup(&self) -> Result<bool> {
        if !self.active.is_file() {
            debug!("no active binary at {}, nothing to back up", self.active.display());
            return Ok(false);
        }
        if self.backup.exists() {
            fs::remove_file(&self.backup).await.context("Failed to remove old backup")?;
        }

        info!("backing up {} to {}", self.active.display(), self.backup.display());
        fs::copy(&self.active, &self.backup).await.context("Failed to create backup")?;

        #[cfg(unix)]
        {
            let permissions = fs::metadata(&self.active)
                .await
                .context("Failed to read binary metadata")?
                .permissions();
            fs::set_permissions(&self.backup, permissions)
                .await
                .context("Failed to set backup permissions")?;
        }

        copy_stamp(&self.active, &self.backup).await?;
        Ok(true)
    }

    /// Replace the active binary with `staged` and make it executable.
    pub async fn deploy(&self, staged: &Path) -> Result<()> {
        if !staged.is_file() {
            bail!("No staged binary at {}", staged.display());
        }
        move_file(staged, &self.active)
            .with_context(|| format!("Failed to move {} into place", staged.display()))?;
        move_stamp(staged, &self.active)?;
        set_executable(&self.active)?;
        info!("deployed {}", self.active.display());
        Ok(())
    }

    /// Move the active binary aside to the `.failed` slot.
    pub async fn quarantine_active(&self) -> Result<()> {
        if !self.active.exists() {
            return Ok(());
        }
        move_file(&self.active, &self.failed)
            .with_context(|| format!("Failed to move {} aside", self.active.display()))?;
        move_stamp(&self.active, &self.failed)
    }

    /// Move the backup into the active slot. Afterwards the backup slot is
    /// empty.
    pub async fn restore_backup(&self) -> Result<()> {
        if !self.backup_exists() {
            bail!("No backup found at {}", self.backup.display());
        }
        warn!("restoring {} from backup", self.active.display());

        let mut attempt = 1;
        loop {
            match self.attempt_restore() {
                Ok(()) => break,
                Err(e) if attempt < RESTORE_ATTEMPTS => {
                    warn!("Restore attempt {attempt} failed: {e:#}. Retrying...");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
        set_executable(&self.active)?;
        info!("restored previous binary");
        Ok(())
    }

    fn attempt_restore(&self) -> Result<()> {
        if self.active.exists() {
            std::fs::remove_file(&self.active).context("Failed to remove active binary")?;
        }
        move_file(&self.backup, &self.active).context("Failed to move backup into place")?;
        move_stamp(&self.backup, &self.active)
    }

    /// Delete the `.failed` artifact and its stamp, if any.
    pub async fn cleanup_failed(&self) -> Result<()> {
        for path in [self.failed.clone(), BuildStamp::path_for(&self.failed)] {
            if path.exists() {
                debug!("removing {}", path.display());
                fs::remove_file(&path)
                    .await
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }
}

async fn copy_stamp(from: &Path, to: &Path) -> Result<()> {
    let (src, dst) = (BuildStamp::path_for(from), BuildStamp::path_for(to));
    if src.is_file() {
        fs::copy(&src, &dst).await.with_context(|| format!("Failed to copy {}", src.display()))?;
    } else if dst.exists() {
        fs::remove_file(&dst).await?;
    }
    Ok(())
}

fn move_stamp(from: &Path, to: &Path) -> Result<()> {
    let (src, dst) = (BuildStamp::path_for(from), BuildStamp::path_for(to));
    if src.is_file() {
        move_file(&src, &dst)
    } else {
        // a stamp left behind would mislabel the binary now in `to`
        if dst.exists() {
            std::fs::remove_file(&dst)?;
        }
        Ok(())
    }
}
