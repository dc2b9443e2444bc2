//! Shared setup for CLI commands.

use crate::build::GoBuilder;
use crate::config::{ConfigResolver, InstallConfig};
use crate::quota::fetcher::QuotaFetcher;
use crate::quota::{QuotaCache, builtin_providers};
use crate::service::{self, HealthProbe, HttpHealthProbe, ServiceManager};
use crate::source::GitSourceTree;
use crate::upgrade::Updater;
use crate::utils::ProgressBar;
use crate::version::ExecBinaryProbe;
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

/// Resolved inputs shared by every command.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub resolver: ConfigResolver,
}

impl CommandContext {
    pub async fn load(root: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            resolver: ConfigResolver::load(root).await?,
        })
    }

    /// Configuration of the existing installation.
    pub fn install_config(&self) -> Result<InstallConfig> {
        self.resolver.resolve()
    }

    pub fn service(&self, cfg: &InstallConfig) -> Result<Arc<dyn ServiceManager>> {
        service::detect(cfg)
    }

    pub fn health(&self) -> Result<Arc<dyn HealthProbe>> {
        Ok(Arc::new(HttpHealthProbe::new()?))
    }

    pub fn source(&self, cfg: &InstallConfig) -> Arc<GitSourceTree> {
        Arc::new(GitSourceTree::new(&cfg.source_dir, &cfg.repo_url, &cfg.branch))
    }

    /// Update orchestrator wired to git, go and the platform service manager.
    pub fn updater(&self, cfg: &InstallConfig) -> Result<Updater> {
        Ok(Updater::new(
            cfg.clone(),
            self.source(cfg),
            Arc::new(GoBuilder::default()),
            Arc::new(ExecBinaryProbe),
            self.service(cfg)?,
            self.health()?,
        ))
    }

    /// Quota cache over the built-in providers.
    pub fn quota_cache(&self) -> Result<Arc<QuotaCache>> {
        let settings = &self.resolver.settings;
        let providers = builtin_providers(&settings.quota)?;
        let fetcher = QuotaFetcher::new(self.resolver.auth_dir()?);
        Ok(Arc::new(QuotaCache::new(providers, fetcher, settings.quota_ttl())))
    }
}

pub fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_message(message.to_string());
    bar
}

pub fn print_warning(message: &str) {
    eprintln!("{} {message}", "warning:".yellow().bold());
}

pub fn print_success(message: &str) {
    println!("{} {message}", "✓".green());
}
