//! Cross-platform service management for the proxy process.
//!
//! The orchestrator and the CLI only see the [`ServiceManager`] trait. The
//! production implementation is [`ServiceController`], which combines:
//!
//! - a [`ManagedProcess`] answering "is it running, under which PID" from the
//!   live process table, and able to spawn/terminate the binary directly;
//! - an optional [`UnitBackend`] for the OS service manager in use:
//!   [`systemd::SystemdUnit`] (Linux user units), [`launchd::LaunchdAgent`]
//!   (macOS user agents) or [`windows::ScheduledTask`] (Windows Task
//!   Scheduler). Without a backend the controller is the degraded
//!   [`ServiceKind::Direct`] variant.
//!
//! The variant is chosen once per process by [`select_kind`] from
//! [`PlatformFacts`]. WSL is the notable case: systemd is only used when PID 1
//! really is systemd.
//!
//! Start is idempotent. Registered units start through the OS manager and
//! fall back to a direct spawn with a warning if that fails. Stop is graceful
//! first, then forced, each followed by a bounded poll.

pub mod command;
pub mod health;
pub mod launchd;
pub mod process;
pub mod systemd;
pub mod windows;

use crate::config::InstallConfig;
use crate::core::ProxyctlError;
use crate::utils::platform::{HostOs, PlatformFacts};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub use health::{HealthProbe, HttpHealthProbe, wait_healthy};
pub use process::{ManagedProcess, port_in_use};

/// Which mechanism manages the proxy process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    Launchd,
    Systemd,
    TaskScheduler,
    /// No OS service manager; the binary is spawned directly.
    Direct,
}

impl ServiceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Launchd => "launchd",
            Self::Systemd => "systemd",
            Self::TaskScheduler => "task-scheduler",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the service variant for this host.
#[must_use]
pub fn select_kind(facts: &PlatformFacts) -> ServiceKind {
    match facts.os {
        HostOs::MacOs if facts.has_launchctl => ServiceKind::Launchd,
        HostOs::Linux if facts.has_systemctl && facts.systemd_pid1 => ServiceKind::Systemd,
        HostOs::Linux if facts.wsl => {
            tracing::debug!("WSL without systemd as PID 1, using direct process management");
            ServiceKind::Direct
        }
        HostOs::Windows if facts.has_schtasks => ServiceKind::TaskScheduler,
        _ => ServiceKind::Direct,
    }
}

/// Lifecycle operations on the managed proxy.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    fn kind(&self) -> ServiceKind;

    /// PID from the live process table.
    async fn pid(&self) -> Result<Option<u32>>;

    async fn is_running(&self) -> Result<bool> {
        Ok(self.pid().await?.is_some())
    }

    /// Start and wait until the process is seen. No-op when already running.
    async fn start(&self) -> Result<()>;

    /// Stop and wait until the process is gone. No-op when not running.
    async fn stop(&self) -> Result<()>;

    async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// Whether an OS auto-start unit is installed.
    async fn is_registered(&self) -> Result<bool>;

    async fn register_autostart(&self) -> Result<()>;

    async fn unregister_autostart(&self) -> Result<()>;

    /// Location of the OS unit definition, if the variant has one.
    fn unit_path(&self) -> Option<PathBuf> {
        None
    }
}

/// OS-specific registration and start/stop of the proxy unit.
#[async_trait]
pub trait UnitBackend: Send + Sync {
    fn kind(&self) -> ServiceKind;

    fn unit_path(&self) -> Option<PathBuf>;

    async fn is_registered(&self) -> Result<bool>;

    async fn register(&self) -> Result<()>;

    async fn unregister(&self) -> Result<()>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// Production [`ServiceManager`].
pub struct ServiceController {
    process: ManagedProcess,
    backend: Option<Box<dyn UnitBackend>>,
}

impl ServiceController {
    #[must_use]
    pub fn new(process: ManagedProcess, backend: Option<Box<dyn UnitBackend>>) -> Self {
        Self {
            process,
            backend,
        }
    }

    /// Build the controller for `kind`.
    pub fn for_kind(kind: ServiceKind, cfg: &InstallConfig) -> Result<Self> {
        let process = ManagedProcess::from_config(cfg);
        let backend: Option<Box<dyn UnitBackend>> = match kind {
            ServiceKind::Systemd => Some(Box::new(systemd::SystemdUnit::new(process.clone())?)),
            ServiceKind::Launchd => Some(Box::new(launchd::LaunchdAgent::new(process.clone())?)),
            ServiceKind::TaskScheduler => Some(Box::new(windows::ScheduledTask::new(process.clone()))),
            ServiceKind::Direct => None,
        };
        Ok(Self::new(process, backend))
    }

    #[must_use]
    pub fn process(&self) -> &ManagedProcess {
        &self.process
    }

    async fn registered_backend(&self) -> Option<&dyn UnitBackend> {
        let backend = self.backend.as_deref()?;
        match backend.is_registered().await {
            Ok(true) => Some(backend),
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(target: "service", "could not query {} registration: {e:#}", backend.kind());
                None
            }
        }
    }
}

/// Detect the platform and build the matching controller.
pub fn detect(cfg: &InstallConfig) -> Result<Arc<dyn ServiceManager>> {
    let kind = select_kind(&PlatformFacts::detect());
    tracing::debug!(target: "service", "using {kind} service management");
    Ok(Arc::new(ServiceController::for_kind(kind, cfg)?))
}

#[async_trait]
impl ServiceManager for ServiceController {
    fn kind(&self) -> ServiceKind {
        self.backend.as_ref().map_or(ServiceKind::Direct, |b| b.kind())
    }

    async fn pid(&self) -> Result<Option<u32>> {
        self.process.find_pid().await
    }

    async fn start(&self) -> Result<()> {
        if let Some(pid) = self.process.find_pid().await? {
            tracing::info!(target: "service", pid, "proxy already running");
            return Ok(());
        }
        if self.process.port_in_use() {
            return Err(ProxyctlError::PortInUse {
                port: self.process.port,
            }
            .into());
        }
        if !self.process.binary.exists() {
            return Err(ProxyctlError::BinaryNotFound {
                path: self.process.binary.display().to_string(),
            }
            .into());
        }

        let mut started_by_os = false;
        if let Some(backend) = self.registered_backend().await {
            match backend.start().await {
                Ok(()) => started_by_os = true,
                Err(e) => tracing::warn!(
                    target: "service",
                    "{} start failed, spawning the binary directly: {e:#}",
                    backend.kind()
                ),
            }
        }
        if !started_by_os {
            self.process.spawn_detached()?;
        }

        match self.process.wait_until_running().await {
            Some(pid) => {
                tracing::info!(target: "service", pid, "proxy started");
                Ok(())
            }
            None => Err(ProxyctlError::ProcessStartFailed {
                binary: self.process.binary.display().to_string(),
                reason: format!(
                    "process not seen within {:.1}s",
                    self.process.budget.max_wait().as_secs_f64()
                ),
            }
            .into()),
        }
    }

    async fn stop(&self) -> Result<()> {
        let Some(pid) = self.process.find_pid().await? else {
            tracing::debug!(target: "service", "proxy not running");
            return Ok(());
        };

        let mut requested = false;
        if let Some(backend) = self.registered_backend().await {
            match backend.stop().await {
                Ok(()) => requested = true,
                Err(e) => tracing::warn!(target: "service", "{} stop failed: {e:#}", backend.kind()),
            }
        }
        if !requested {
            self.process.terminate(pid).await;
        }
        if self.process.wait_until_gone(pid).await {
            tracing::info!(target: "service", pid, "proxy stopped");
            return Ok(());
        }

        tracing::warn!(target: "service", pid, "proxy did not exit gracefully, killing");
        self.process.kill(pid).await;
        if self.process.wait_until_gone(pid).await {
            return Ok(());
        }
        Err(ProxyctlError::ProcessStopFailed {
            pid,
        }
        .into())
    }

    async fn is_registered(&self) -> Result<bool> {
        match &self.backend {
            Some(backend) => backend.is_registered().await,
            None => Ok(false),
        }
    }

    async fn register_autostart(&self) -> Result<()> {
        match &self.backend {
            Some(backend) => backend.register().await,
            None => Err(ProxyctlError::PlatformNotSupported {
                operation: "auto-start registration".into(),
            }
            .into()),
        }
    }

    async fn unregister_autostart(&self) -> Result<()> {
        match &self.backend {
            Some(backend) => backend.unregister().await,
            None => Err(ProxyctlError::PlatformNotSupported {
                operation: "auto-start registration".into(),
            }
            .into()),
        }
    }

    fn unit_path(&self) -> Option<PathBuf> {
        self.backend.as_ref().and_then(|b| b.unit_path())
    }
}

/// Manual fallback shown when auto-start cannot be registered.
#[must_use]
pub fn manual_autostart_hint(cfg: &InstallConfig) -> String {
    format!(
        "add '{} -config {}' to your login items or crontab (@reboot), or run 'proxyctl start' after login",
        cfg.binary_path.display(),
        cfg.config_file.display()
    )
}
