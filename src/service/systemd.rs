//! systemd user unit (`~/.config/systemd/user/cli-proxy-api.service`).

use super::command::{run_cmd, run_cmd_ignore_failure};
use super::{ManagedProcess, ServiceKind, UnitBackend};
use crate::constants::SERVICE_NAME;
use crate::utils::atomic_write;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

pub struct SystemdUnit {
    process: ManagedProcess,
    unit_dir: PathBuf,
}

impl SystemdUnit {
    pub fn new(process: ManagedProcess) -> Result<Self> {
        let unit_dir = dirs::config_dir()
            .context("Unable to determine configuration directory for systemd user units")?
            .join("systemd")
            .join("user");
        Ok(Self::with_unit_dir(process, unit_dir))
    }

    #[must_use]
    pub fn with_unit_dir(process: ManagedProcess, unit_dir: PathBuf) -> Self {
        Self {
            process,
            unit_dir,
        }
    }

    fn unit_name() -> String {
        format!("{SERVICE_NAME}.service")
    }

    fn unit_file(&self) -> PathBuf {
        self.unit_dir.join(Self::unit_name())
    }

    #[must_use]
    pub fn render(&self) -> String {
        let p = &self.process;
        let exec = std::iter::once(p.binary.display().to_string())
            .chain(p.launch_args())
            .map(|arg| quote_arg(&arg))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "# Managed by proxyctl. Regenerate with: proxyctl autostart enable\n\
             [Unit]\n\
             Description=CLI Proxy API\n\
             After=network-online.target\n\
             Wants=network-online.target\n\
             \n\
             [Service]\n\
             Type=simple\n\
             WorkingDirectory={}\n\
             ExecStart={exec}\n\
             Restart=on-failure\n\
             RestartSec=5\n\
             StandardOutput=append:{}\n\
             StandardError=append:{}\n\
             \n\
             [Install]\n\
             WantedBy=default.target\n",
            p.working_dir.display(),
            p.log_file.display(),
            p.log_file.display(),
        )
    }
}

fn quote_arg(arg: &str) -> String {
    if arg.contains(char::is_whitespace) {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

#[async_trait]
impl UnitBackend for SystemdUnit {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Systemd
    }

    fn unit_path(&self) -> Option<PathBuf> {
        Some(self.unit_file())
    }

    async fn is_registered(&self) -> Result<bool> {
        Ok(self.unit_file().is_file())
    }

    async fn register(&self) -> Result<()> {
        if let Some(dir) = self.process.log_file.parent() {
            crate::utils::ensure_dir(dir)?;
        }
        atomic_write(&self.unit_file(), self.render().as_bytes())?;
        run_cmd("systemctl", &["--user", "daemon-reload"]).await?;
        run_cmd("systemctl", &["--user", "enable", &Self::unit_name()]).await?;
        tracing::info!(target: "service", "registered systemd unit {}", self.unit_file().display());
        Ok(())
    }

    async fn unregister(&self) -> Result<()> {
        run_cmd_ignore_failure("systemctl", &["--user", "disable", &Self::unit_name()]).await;
        let unit = self.unit_file();
        if unit.exists() {
            std::fs::remove_file(&unit).with_context(|| format!("Failed to remove {}", unit.display()))?;
        }
        run_cmd_ignore_failure("systemctl", &["--user", "daemon-reload"]).await;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        run_cmd("systemctl", &["--user", "start", &Self::unit_name()]).await.map(|_| ())
    }

    async fn stop(&self) -> Result<()> {
        run_cmd("systemctl", &["--user", "stop", &Self::unit_name()]).await.map(|_| ())
    }
}
