//! Restoring the previous binary.
//!
//! Stop, move the active binary aside to `.failed`, move `.bak` into the
//! active slot, start, verify. A successful rollback leaves the backup slot
//! empty and removes the `.failed` artifact. A failed rollback is terminal;
//! there is no second-level rollback.
//!
//! A manual rollback takes the installation's [`UpdateLock`]; the automatic
//! one runs under the lock its update already holds.

use super::backup::BackupManager;
use super::lock::UpdateLock;
use crate::config::InstallConfig;
use crate::core::ProxyctlError;
use crate::service::{HealthProbe, ServiceManager, wait_healthy};
use crate::utils::PollBudget;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub struct RollbackManager {
    backups: BackupManager,
    service: Arc<dyn ServiceManager>,
    health: Arc<dyn HealthProbe>,
    health_url: String,
    health_budget: PollBudget,
    lock_path: PathBuf,
}

impl RollbackManager {
    pub fn new(cfg: &InstallConfig, service: Arc<dyn ServiceManager>, health: Arc<dyn HealthProbe>) -> Self {
        Self {
            backups: BackupManager::new(cfg),
            service,
            health,
            health_url: cfg.health_url(),
            health_budget: cfg.health_budget,
            lock_path: cfg.lock_path(),
        }
    }

    #[must_use]
    pub fn backup_exists(&self) -> bool {
        self.backups.backup_exists()
    }

    /// Run the rollback procedure.
    ///
    /// Fails with [`ProxyctlError::NoBackup`] before touching anything when
    /// there is no backup, and with [`ProxyctlError::RollbackFailed`] once
    /// the procedure has started and cannot complete. Fails with
    /// [`ProxyctlError::UpdateInProgress`] while an update or another
    /// rollback holds the lock.
    pub async fn rollback(&self) -> Result<()> {
        let _lock = UpdateLock::try_acquire(&self.lock_path).await?;
        self.rollback_locked().await
    }

    /// The procedure itself; the caller must hold the update lock.
    pub(super) async fn rollback_locked(&self) -> Result<()> {
        if !self.backups.backup_exists() {
            return Err(ProxyctlError::NoBackup {
                path: self.backups.backup_path().display().to_string(),
            }
            .into());
        }

        info!("rolling back to {}", self.backups.backup_path().display());
        if let Err(e) = self.service.stop().await {
            warn!("stop before rollback failed: {e:#}");
        }
        if let Err(e) = self.backups.quarantine_active().await {
            warn!("could not move the current binary aside: {e:#}");
        }

        self.backups.restore_backup().await.map_err(failed)?;
        self.service.start().await.map_err(failed)?;
        wait_healthy(self.health.as_ref(), &self.health_url, self.health_budget)
            .await
            .map_err(failed)?;

        if let Err(e) = self.backups.cleanup_failed().await {
            warn!("could not remove {}: {e:#}", self.backups.failed_path().display());
        }
        info!("rollback verified");
        Ok(())
    }
}

fn failed(e: anyhow::Error) -> anyhow::Error {
    ProxyctlError::RollbackFailed {
        reason: format!("{e:#}"),
    }
    .into()
}
