//! Build-deploy-verify updates of the proxy with automatic rollback.
//!
//! # Workflow
//!
//! ```text
//! Idle → Fetching ─(already current, not forced)→ Idle
//!            │
//!            ▼
//!        Building → BackingUp → Deploying → Restarting → Verifying → Verified
//!                                                 │            │
//!                                                 └────────────┴→ RollingBack → RolledBack
//!                                                                      │
//!                                                                      └→ Failed
//! ```
//!
//! - **Fetching** hard-resets the source checkout to the remote branch.
//! - The installed binary's version is compared with the fetched source
//!   before anything is built; equal versions end the run unless forced.
//! - **Building** writes to `.<name>.new` in the bin directory. A failed
//!   build leaves the installed binary untouched and running.
//! - **BackingUp** copies the active binary to `<name>.bak`.
//! - **Deploying** moves the staged build over the active binary.
//! - **Restarting** stops then starts through the [`ServiceManager`].
//! - **Verifying** polls the proxy's HTTP port until it answers 2xx.
//!
//! Any failure after the deploy triggers [`rollback::RollbackManager`]. A
//! successful rollback still fails the update with
//! [`ProxyctlError::UpdateReverted`]; a failed rollback surfaces as
//! [`ProxyctlError::RollbackFailed`], the one outcome needing manual repair.
//!
//! Runs are serialised per installation by [`lock::UpdateLock`].

pub mod backup;
pub mod lock;
pub mod rollback;
pub mod verification;


use crate::build::{Builder, stamp_for};
use crate::config::InstallConfig;
use crate::core::ProxyctlError;
use crate::git::SourceRevision;
use crate::service::{HealthProbe, ServiceManager, wait_healthy};
use crate::source::SourceTree;
use crate::utils::ProgressBar;
use crate::version::{BinaryProbe, VersionFact, VersionSnapshot, VersionTracker};
use anyhow::Result;
use backup::BackupManager;
use lock::UpdateLock;
use rollback::RollbackManager;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use verification::ChecksumVerifier;

/// Phase of one `update` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateState {
    Idle,
    Fetching,
    Building,
    BackingUp,
    Deploying,
    Restarting,
    /// Deployed but not yet verified.
    Verifying,
    Verified,
    RollingBack,
    RolledBack,
    Failed,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Building => "building",
            Self::BackingUp => "backing up",
            Self::Deploying => "deploying",
            Self::Restarting => "restarting",
            Self::Verifying => "verifying",
            Self::Verified => "verified",
            Self::RollingBack => "rolling back",
            Self::RolledBack => "rolled back",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Rebuild and redeploy even when already current.
    pub force: bool,
    /// Fetch and report only.
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    UpToDate {
        version: String,
    },
    Updated {
        from: VersionFact,
        to: String,
    },
    DryRun {
        snapshot: VersionSnapshot,
        remote: Option<SourceRevision>,
    },
}

#[derive(Debug, Clone)]
pub struct UpdateReport {
    pub outcome: UpdateOutcome,
    /// Every state the run passed through, in order.
    pub states: Vec<UpdateState>,
}

/// Drives one update of an installation.
pub struct Updater {
    cfg: InstallConfig,
    source: Arc<dyn SourceTree>,
    builder: Arc<dyn Builder>,
    binary: Arc<dyn BinaryProbe>,
    service: Arc<dyn ServiceManager>,
    health: Arc<dyn HealthProbe>,
    progress: ProgressBar,
}

impl Updater {
    pub fn new(
        cfg: InstallConfig,
        source: Arc<dyn SourceTree>,
        builder: Arc<dyn Builder>,
        binary: Arc<dyn BinaryProbe>,
        service: Arc<dyn ServiceManager>,
        health: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            cfg,
            source,
            builder,
            binary,
            service,
            health,
            progress: ProgressBar::hidden(),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn rollback_manager(&self) -> RollbackManager {
        RollbackManager::new(&self.cfg, Arc::clone(&self.service), Arc::clone(&self.health))
    }

    fn tracker(&self) -> VersionTracker {
        VersionTracker::new(Arc::clone(&self.source), Arc::clone(&self.binary), Arc::clone(&self.health))
    }

    pub async fn run(&self, opts: UpdateOptions) -> Result<UpdateReport> {
        let mut states = Vec::new();
        let outcome = self.run_recorded(opts, &mut states).await?;
        Ok(UpdateReport {
            outcome,
            states,
        })
    }

    /// Like [`Updater::run`], recording states into `states` even when the
    /// run fails.
    pub async fn run_recorded(
        &self,
        opts: UpdateOptions,
        states: &mut Vec<UpdateState>,
    ) -> Result<UpdateOutcome> {
        let _lock = UpdateLock::try_acquire(&self.cfg.lock_path()).await?;
        let result = self.drive(opts, states).await;
        self.progress.finish_and_clear();
        result
    }

    fn enter(&self, states: &mut Vec<UpdateState>, state: UpdateState) {
        info!("update: {state}");
        self.progress.set_message(format!("{state}..."));
        states.push(state);
    }

    async fn drive(&self, opts: UpdateOptions, states: &mut Vec<UpdateState>) -> Result<UpdateOutcome> {
        self.enter(states, UpdateState::Idle);
        self.enter(states, UpdateState::Fetching);

        if opts.dry_run {
            self.source.fetch().await?;
            let snapshot = self.tracker().snapshot(&self.cfg).await;
            let remote = self.source.remote_head().await?;
            self.enter(states, UpdateState::Idle);
            return Ok(UpdateOutcome::DryRun {
                snapshot,
                remote,
            });
        }

        let rev = match self.source.sync().await {
            Ok(rev) => rev,
            Err(e) => {
                self.enter(states, UpdateState::Failed);
                return Err(e);
            }
        };
        let installed = self.binary.probe(&self.cfg.binary_path).await;
        if !opts.force && installed.matches(&VersionFact::Known(rev.version.clone())) {
            info!("already at {}", rev.version);
            self.enter(states, UpdateState::Idle);
            return Ok(UpdateOutcome::UpToDate {
                version: rev.version,
            });
        }

        self.enter(states, UpdateState::Building);
        let staging = self.cfg.staging_path();
        let stamp = stamp_for(&rev);
        if let Err(e) = self.builder.build(self.source.path(), &staging, &stamp).await {
            discard_staging(&staging).await;
            self.enter(states, UpdateState::Failed);
            return Err(e);
        }

        let backups = BackupManager::new(&self.cfg);
        self.enter(states, UpdateState::BackingUp);
        if let Err(e) = backups.create_backup().await {
            discard_staging(&staging).await;
            self.enter(states, UpdateState::Failed);
            return Err(e);
        }

        self.enter(states, UpdateState::Deploying);
        if let Err(e) = self.deploy(&backups, &staging).await {
            // the active slot may be half-replaced; treat like a bad deploy
            return self.recover(states, e).await;
        }

        self.enter(states, UpdateState::Restarting);
        let restarted = async {
            self.service.stop().await?;
            self.service.start().await
        }
        .await;
        if let Err(e) = restarted {
            return self.recover(states, e).await;
        }

        self.enter(states, UpdateState::Verifying);
        if let Err(e) =
            wait_healthy(self.health.as_ref(), &self.cfg.health_url(), self.cfg.health_budget).await
        {
            return self.recover(states, e).await;
        }

        self.enter(states, UpdateState::Verified);
        if let Err(e) = backups.cleanup_failed().await {
            warn!("{e:#}");
        }
        info!("updated {installed} -> {}", rev.version);
        Ok(UpdateOutcome::Updated {
            from: installed,
            to: rev.version,
        })
    }

    async fn deploy(&self, backups: &BackupManager, staging: &std::path::Path) -> Result<()> {
        let checksum = ChecksumVerifier::compute_sha256(staging).await?;
        backups.deploy(staging).await?;
        ChecksumVerifier::verify_checksum(&self.cfg.binary_path, &checksum).await
    }

    async fn recover(&self, states: &mut Vec<UpdateState>, cause: anyhow::Error) -> Result<UpdateOutcome> {
        warn!("update failed, rolling back: {cause:#}");
        self.enter(states, UpdateState::RollingBack);
        match self.rollback_manager().rollback_locked().await {
            Ok(()) => {
                self.enter(states, UpdateState::RolledBack);
                let restored = self.binary.probe(&self.cfg.binary_path).await;
                Err(ProxyctlError::UpdateReverted {
                    restored: restored.to_string(),
                    reason: format!("{cause:#}"),
                }
                .into())
            }
            Err(e) => {
                self.enter(states, UpdateState::Failed);
                let reason = match e.downcast_ref::<ProxyctlError>() {
                    Some(ProxyctlError::NoBackup {
                        ..
                    }) => format!("{cause:#}; no previous binary to restore"),
                    _ => format!("{cause:#}; {e:#}"),
                };
                Err(ProxyctlError::RollbackFailed {
                    reason,
                }
                .into())
            }
        }
    }
}

async fn discard_staging(staging: &std::path::Path) {
    for path in [staging.to_path_buf(), crate::version::BuildStamp::path_for(staging)] {
        if path.exists()
            && let Err(e) = tokio::fs::remove_file(&path).await
        {
            warn!("could not remove {}: {e}", path.display());
        }
    }
}
