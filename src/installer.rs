//! First-time installation of the proxy.
//!
//! `install` lays out the installation root, checks out the source, builds
//! and deploys the binary, writes a default `config.yaml` and `.env` when
//! they are missing, registers auto-start and starts the proxy. Every step
//! is idempotent: running it again on a complete installation rebuilds
//! nothing and only starts the proxy if it is down.
//!
//! ```text
//! <root>/
//! ├── source/               git checkout
//! ├── bin/cli-proxy-api     active binary (+ .version stamp)
//! ├── logs/proxy.log
//! ├── config.yaml
//! └── .env
//! ```

use crate::build::{Builder, stamp_for};
use crate::config::{InstallConfig, dotenv, proxy_config};
use crate::constants::DEFAULT_AUTH_DIR;
use crate::service::{HealthProbe, ServiceManager, manual_autostart_hint, wait_healthy};
use crate::source::SourceTree;
use crate::upgrade::backup::BackupManager;
use crate::upgrade::lock::UpdateLock;
use crate::utils::{ProgressBar, atomic_write, ensure_dir};
use crate::version::BuildStamp;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct InstallOptions {
    pub start: bool,
    pub autostart: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            start: true,
            autostart: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    /// Version now in the active slot.
    pub version: String,
    /// False when the installed binary already matched the source.
    pub built: bool,
    pub wrote_config: bool,
    pub wrote_dotenv: bool,
    /// Why auto-start could not be registered, with a manual alternative.
    pub autostart_warning: Option<String>,
    pub started: bool,
}

pub struct Installer {
    cfg: InstallConfig,
    source: Arc<dyn SourceTree>,
    builder: Arc<dyn Builder>,
    service: Arc<dyn ServiceManager>,
    health: Arc<dyn HealthProbe>,
    progress: ProgressBar,
}

impl Installer {
    pub fn new(
        cfg: InstallConfig,
        source: Arc<dyn SourceTree>,
        builder: Arc<dyn Builder>,
        service: Arc<dyn ServiceManager>,
        health: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            cfg,
            source,
            builder,
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

    pub async fn run(&self, opts: InstallOptions) -> Result<InstallReport> {
        for dir in [&self.cfg.root, &self.cfg.bin_dir, &self.cfg.log_dir] {
            ensure_dir(dir)?;
        }
        let _lock = UpdateLock::try_acquire(&self.cfg.lock_path()).await?;
        let result = self.install(opts).await;
        self.progress.finish_and_clear();
        result
    }

    async fn install(&self, opts: InstallOptions) -> Result<InstallReport> {
        let mut report = InstallReport::default();

        self.progress.set_message("fetching source...");
        self.source.ensure().await?;
        let rev = match self.source.current().await? {
            Some(rev) => rev,
            None => self.source.sync().await?,
        };

        let installed = BuildStamp::read(&self.cfg.binary_path).ok().flatten().map(|s| s.version);
        if self.cfg.binary_path.is_file() && installed.as_deref() == Some(rev.version.as_str()) {
            info!("binary already at {}", rev.version);
        } else {
            self.progress.set_message(format!("building {}...", rev.version));
            let staging = self.cfg.staging_path();
            self.builder.build(self.source.path(), &staging, &stamp_for(&rev)).await?;
            let backups = BackupManager::new(&self.cfg);
            backups.create_backup().await?;
            backups.deploy(&staging).await?;
            report.built = true;
            info!("installed {} at {}", rev.version, self.cfg.binary_path.display());
        }
        report.version = rev.version;

        self.progress.set_message("writing configuration...");
        self.write_defaults(&mut report)?;

        if opts.autostart
            && let Err(e) = self.service.register_autostart().await
        {
            warn!("auto-start registration failed: {e:#}");
            report.autostart_warning = Some(format!("{e:#}; {}", manual_autostart_hint(&self.cfg)));
        }

        if opts.start {
            self.progress.set_message("starting proxy...");
            self.service.start().await?;
            wait_healthy(self.health.as_ref(), &self.cfg.health_url(), self.cfg.health_budget).await?;
            report.started = true;
        }
        Ok(report)
    }

    /// Write `.env` and `config.yaml` if missing, sharing one API key.
    fn write_defaults(&self, report: &mut InstallReport) -> Result<()> {
        let need_dotenv = !self.cfg.dotenv_file.exists();
        let need_config = !self.cfg.config_file.exists();
        if !need_dotenv && !need_config {
            return Ok(());
        }

        let api_key = if self.cfg.uses_placeholder_key() {
            dotenv::generate_api_key()
        } else {
            self.cfg.api_key.clone()
        };

        if need_dotenv {
            atomic_write(&self.cfg.dotenv_file, dotenv::render(&api_key).as_bytes())
                .with_context(|| format!("Failed to write {}", self.cfg.dotenv_file.display()))?;
            restrict_permissions(&self.cfg.dotenv_file);
            report.wrote_dotenv = true;
        }
        if need_config {
            let auth_dir = format!("~/{DEFAULT_AUTH_DIR}");
            let content = proxy_config::render_default(self.cfg.port, &auth_dir, &api_key);
            atomic_write(&self.cfg.config_file, content.as_bytes())
                .with_context(|| format!("Failed to write {}", self.cfg.config_file.display()))?;
            report.wrote_config = true;
        }
        Ok(())
    }
}

/// `.env` holds a secret; keep it owner-only on Unix.
fn restrict_permissions(path: &std::path::Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            warn!("could not restrict permissions of {}: {e}", path.display());
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
