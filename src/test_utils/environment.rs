//! Test installation setup
//!
//! [`TestInstall`] lays out an installation root in a temporary directory and
//! wires the update workflow to the fakes in [`super::fakes`].

use super::fakes::{FakeBinaryProbe, FakeBuilder, FakeHealthProbe, FakeServiceManager, FakeSourceTree, write_fake_binary};
use crate::config::{ConfigResolver, InstallConfig};
use crate::upgrade::Updater;
use crate::utils::PollBudget;
use anyhow::Result;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// An installation root with fake collaborators.
pub struct TestInstall {
    pub temp_dir: TempDir,
    pub cfg: InstallConfig,
    pub source: Arc<FakeSourceTree>,
    pub builder: Arc<FakeBuilder>,
    pub service: Arc<FakeServiceManager>,
    pub health: Arc<FakeHealthProbe>,
}

impl TestInstall {
    /// Empty installation whose upstream is at `remote_version`.
    pub fn new(remote_version: &str) -> Result<Self> {
        super::init_test_logging(None);

        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("cliproxyapi");
        fs::create_dir_all(root.join("bin"))?;
        fs::create_dir_all(root.join("logs"))?;

        let resolver = ConfigResolver {
            home: Some(temp_dir.path().to_path_buf()),
            ..ConfigResolver::default()
        };
        let mut cfg = resolver.resolve_at(root)?;
        cfg.health_budget = PollBudget::new(3, Duration::from_millis(5));
        cfg.process_budget = PollBudget::new(3, Duration::from_millis(5));

        let source = Arc::new(FakeSourceTree::new(cfg.source_dir.clone(), remote_version));
        let service = Arc::new(FakeServiceManager::new(cfg.binary_path.clone()));
        let health = Arc::new(FakeHealthProbe::new(Arc::clone(&service)));
        Ok(Self {
            temp_dir,
            cfg,
            source,
            builder: Arc::new(FakeBuilder::default()),
            service,
            health,
        })
    }

    /// Installation already running a healthy `version`.
    pub async fn deployed(version: &str) -> Result<Self> {
        let install = Self::new(version)?;
        write_fake_binary(&install.cfg.binary_path, version, true)?;
        crate::service::ServiceManager::start(install.service.as_ref()).await?;
        Ok(install)
    }

    pub fn updater(&self) -> Updater {
        Updater::new(
            self.cfg.clone(),
            self.source.clone(),
            self.builder.clone(),
            Arc::new(FakeBinaryProbe),
            self.service.clone(),
            self.health.clone(),
        )
    }

    /// Version stamped on the active binary.
    pub fn active_version(&self) -> Option<String> {
        crate::version::BuildStamp::read(&self.cfg.binary_path).ok().flatten().map(|s| s.version)
    }
}
