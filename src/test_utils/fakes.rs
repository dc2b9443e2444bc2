//! In-memory collaborators for exercising the update workflow and the
//! quota engine without git, go, an OS service manager or the network.
//!
//! The fakes share state the way the real system does: the
//! [`FakeBuilder`] writes a binary whose content says whether it is
//! healthy, the [`FakeServiceManager`] "runs" whatever binary is in the
//! active slot, and the [`FakeHealthProbe`] answers according to what is
//! running.

use crate::build::Builder;
use crate::core::ProxyctlError;
use crate::git::SourceRevision;
use crate::quota::credentials::Credential;
use crate::quota::{AccountQuota, QuotaProvider, ResourceQuota};
use crate::service::{HealthProbe, ServiceKind, ServiceManager};
use crate::source::SourceTree;
use crate::version::{BinaryProbe, BuildStamp, VersionFact};
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Marker written into binaries that should fail health verification.
pub const UNHEALTHY_MARKER: &str = "unhealthy";

fn revision(version: &str) -> SourceRevision {
    SourceRevision {
        version: version.to_string(),
        commit: format!("c{}", version.replace('.', "")),
    }
}

/// Source tree whose remote can be advanced with [`FakeSourceTree::publish`].
pub struct FakeSourceTree {
    path: PathBuf,
    current: Mutex<Option<SourceRevision>>,
    remote: Mutex<SourceRevision>,
    pub syncs: AtomicU32,
    pub fetches: AtomicU32,
}

impl FakeSourceTree {
    pub fn new(path: impl Into<PathBuf>, remote_version: &str) -> Self {
        Self {
            path: path.into(),
            current: Mutex::new(None),
            remote: Mutex::new(revision(remote_version)),
            syncs: AtomicU32::new(0),
            fetches: AtomicU32::new(0),
        }
    }

    /// A new commit lands upstream.
    pub fn publish(&self, version: &str) {
        *self.remote.lock().unwrap() = revision(version);
    }
}

#[async_trait]
impl SourceTree for FakeSourceTree {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path)?;
        let mut current = self.current.lock().unwrap();
        if current.is_none() {
            *current = Some(self.remote.lock().unwrap().clone());
        }
        Ok(())
    }

    async fn fetch(&self) -> Result<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn sync(&self) -> Result<SourceRevision> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        let remote = self.remote.lock().unwrap().clone();
        *self.current.lock().unwrap() = Some(remote.clone());
        Ok(remote)
    }

    async fn current(&self) -> Result<Option<SourceRevision>> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn remote_head(&self) -> Result<Option<SourceRevision>> {
        Ok(Some(self.remote.lock().unwrap().clone()))
    }
}

/// Writes a text "binary" plus its build stamp.
#[derive(Default)]
pub struct FakeBuilder {
    broken: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    pub builds: AtomicU32,
}

impl FakeBuilder {
    /// Builds of `version` succeed but never pass health verification.
    pub fn mark_unhealthy(&self, version: &str) {
        self.broken.lock().unwrap().insert(version.to_string());
    }

    /// Builds of `version` fail to compile.
    pub fn mark_failing(&self, version: &str) {
        self.failing.lock().unwrap().insert(version.to_string());
    }
}

/// Write a fake binary for `version` at `path`.
pub fn write_fake_binary(path: &Path, version: &str, healthy: bool) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let marker = if healthy { "" } else { UNHEALTHY_MARKER };
    std::fs::write(path, format!("fake-proxy {version} {marker}\n"))?;
    BuildStamp {
        version: version.to_string(),
        commit: format!("c{}", version.replace('.', "")),
        build_date: "2026-01-01T00:00:00Z".into(),
    }
    .write(path)
}

#[async_trait]
impl Builder for FakeBuilder {
    async fn build(&self, _source_dir: &Path, output: &Path, stamp: &BuildStamp) -> Result<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&stamp.version) {
            return Err(ProxyctlError::BuildFailed {
                reason: format!("compile error in {}", stamp.version),
            }
            .into());
        }
        let healthy = !self.broken.lock().unwrap().contains(&stamp.version);
        write_fake_binary(output, &stamp.version, healthy)
    }
}

/// Reads versions from build stamps only.
pub struct FakeBinaryProbe;

#[async_trait]
impl BinaryProbe for FakeBinaryProbe {
    async fn probe(&self, binary: &Path) -> VersionFact {
        if !binary.is_file() {
            return VersionFact::Absent;
        }
        match BuildStamp::read(binary) {
            Ok(Some(stamp)) => VersionFact::Known(stamp.version),
            _ => VersionFact::Unreachable,
        }
    }
}

/// "Runs" the binary in the active slot.
pub struct FakeServiceManager {
    binary: PathBuf,
    running: Mutex<Option<String>>,
    registered: Mutex<bool>,
    pub starts: AtomicU32,
    pub stops: AtomicU32,
}

impl FakeServiceManager {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            running: Mutex::new(None),
            registered: Mutex::new(false),
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
        }
    }

    /// Content of the binary that was started, if running.
    pub fn running_content(&self) -> Option<String> {
        self.running.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceManager for FakeServiceManager {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Direct
    }

    async fn pid(&self) -> Result<Option<u32>> {
        Ok(self.running.lock().unwrap().as_ref().map(|_| 4242))
    }

    async fn start(&self) -> Result<()> {
        if self.running.lock().unwrap().is_some() {
            return Ok(());
        }
        if !self.binary.is_file() {
            return Err(ProxyctlError::BinaryNotFound {
                path: self.binary.display().to_string(),
            }
            .into());
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        let content = std::fs::read_to_string(&self.binary)?;
        *self.running.lock().unwrap() = Some(content);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.running.lock().unwrap().take().is_some() {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn is_registered(&self) -> Result<bool> {
        Ok(*self.registered.lock().unwrap())
    }

    async fn register_autostart(&self) -> Result<()> {
        *self.registered.lock().unwrap() = true;
        Ok(())
    }

    async fn unregister_autostart(&self) -> Result<()> {
        *self.registered.lock().unwrap() = false;
        Ok(())
    }
}

/// Healthy while a binary without [`UNHEALTHY_MARKER`] is running.
pub struct FakeHealthProbe {
    service: Arc<FakeServiceManager>,
}

impl FakeHealthProbe {
    pub fn new(service: Arc<FakeServiceManager>) -> Self {
        Self {
            service,
        }
    }
}

#[async_trait]
impl HealthProbe for FakeHealthProbe {
    async fn check(&self, url: &str) -> Result<()> {
        match self.service.running_content() {
            Some(content) if !content.contains(UNHEALTHY_MARKER) => Ok(()),
            Some(_) => bail!("{url} answered HTTP 502"),
            None => bail!("connection refused: {url}"),
        }
    }

    async fn running_version(&self, _url: &str) -> VersionFact {
        match self.service.running_content() {
            Some(content) => content
                .split_whitespace()
                .nth(1)
                .map_or(VersionFact::Absent, |v| VersionFact::Known(v.to_string())),
            None => VersionFact::Unreachable,
        }
    }
}

/// Quota provider answering from a fixed table keyed by email, with an
/// optional per-call delay and a call counter.
pub struct FakeQuotaProvider {
    name: &'static str,
    quotas: HashMap<String, Vec<ResourceQuota>>,
    delay: Duration,
    pub calls: AtomicU32,
}

impl FakeQuotaProvider {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            quotas: HashMap::new(),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn with_account(mut self, email: &str, resources: Vec<ResourceQuota>) -> Self {
        self.quotas.insert(email.to_string(), resources);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuotaProvider for FakeQuotaProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn refresh_token(&self, credential: &mut Credential) -> Result<()> {
        credential.set_access_token("refreshed-token", chrono::Utc::now() + chrono::Duration::hours(1));
        Ok(())
    }

    async fn fetch(&self, credential: &Credential) -> Result<AccountQuota> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let email = credential.email.clone();
        match self.quotas.get(&email) {
            Some(resources) => Ok(AccountQuota::new(email, Some("pro".into()), resources.clone())),
            None => bail!("no quota for {email}"),
        }
    }
}
