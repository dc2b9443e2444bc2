//! The managed proxy process as seen in the live OS process table.
//!
//! No PID files: whether the proxy runs, and under which PID, is always
//! answered by enumerating processes with `sysinfo` and matching the managed
//! binary, first by executable path and then by file name.

use crate::config::InstallConfig;
use crate::core::ProxyctlError;
use crate::utils::{PollBudget, ensure_dir, poll_until, poll_until_true};
use anyhow::{Context, Result};
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, RefreshKind, Signal, System};

/// Locations and budgets needed to run the proxy directly.
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    pub binary: PathBuf,
    pub config_file: PathBuf,
    pub working_dir: PathBuf,
    pub log_file: PathBuf,
    pub port: u16,
    pub budget: PollBudget,
}

impl ManagedProcess {
    #[must_use]
    pub fn from_config(cfg: &InstallConfig) -> Self {
        Self {
            binary: cfg.binary_path.clone(),
            config_file: cfg.config_file.clone(),
            working_dir: cfg.root.clone(),
            log_file: cfg.log_file.clone(),
            port: cfg.port,
            budget: cfg.process_budget,
        }
    }

    /// Arguments the proxy is launched with.
    #[must_use]
    pub fn launch_args(&self) -> Vec<String> {
        vec!["-config".to_string(), self.config_file.display().to_string()]
    }

    /// PID of the managed binary, if running.
    pub async fn find_pid(&self) -> Result<Option<u32>> {
        let binary = self.binary.clone();
        tokio::task::spawn_blocking(move || find_pid_blocking(&binary))
            .await
            .context("process lookup task panicked")
    }

    /// Wait until the binary shows up in the process table.
    pub async fn wait_until_running(&self) -> Option<u32> {
        poll_until(self.budget, || async { self.find_pid().await.ok().flatten() }).await
    }

    /// Wait until `pid` is gone from the process table.
    pub async fn wait_until_gone(&self, pid: u32) -> bool {
        poll_until_true(self.budget, || async move { !pid_alive(pid).await }).await
    }

    /// Launch the binary detached, appending stdout/stderr to the log file.
    pub fn spawn_detached(&self) -> Result<u32> {
        if let Some(dir) = self.log_file.parent() {
            ensure_dir(dir)?;
        }
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .with_context(|| format!("Failed to open log file {}", self.log_file.display()))?;
        let log_err = log.try_clone()?;

        let mut cmd = std::process::Command::new(&self.binary);
        cmd.args(self.launch_args())
            .current_dir(&self.working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(log)
            .stderr(log_err);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        let child = cmd.spawn().map_err(|e| ProxyctlError::ProcessStartFailed {
            binary: self.binary.display().to_string(),
            reason: e.to_string(),
        })?;
        let pid = child.id();
        tracing::info!(target: "service", pid, "spawned {} directly", self.binary.display());
        Ok(pid)
    }

    /// Graceful termination (SIGTERM; plain kill where signals are unsupported).
    pub async fn terminate(&self, pid: u32) -> bool {
        signal_pid(pid, Signal::Term).await
    }

    /// Forced termination.
    pub async fn kill(&self, pid: u32) -> bool {
        signal_pid(pid, Signal::Kill).await
    }

    /// Whether something is already listening on the proxy port.
    #[must_use]
    pub fn port_in_use(&self) -> bool {
        port_in_use(self.port)
    }
}

/// Try to bind `127.0.0.1:<port>`; failure means the port is taken.
#[must_use]
pub fn port_in_use(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_err()
}

fn process_system() -> System {
    System::new_with_specifics(RefreshKind::nothing().with_processes(ProcessRefreshKind::everything()))
}

fn is_live(status: ProcessStatus) -> bool {
    !matches!(status, ProcessStatus::Zombie | ProcessStatus::Dead)
}

fn find_pid_blocking(binary: &Path) -> Option<u32> {
    let mut system = process_system();
    system.refresh_processes(ProcessesToUpdate::All, true);
    let own = std::process::id();
    let target = binary.canonicalize().unwrap_or_else(|_| binary.to_path_buf());
    let name = binary.file_name()?;

    let candidates = || {
        system
            .processes()
            .values()
            .filter(|p| p.pid().as_u32() != own && is_live(p.status()))
    };

    candidates()
        .find(|p| p.exe().is_some_and(|exe| exe == target.as_path() || exe == binary))
        .or_else(|| candidates().find(|p| p.name() == name))
        .map(|p| p.pid().as_u32())
}

async fn pid_alive(pid: u32) -> bool {
    tokio::task::spawn_blocking(move || {
        let mut system = process_system();
        let pid = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).is_some_and(|p| is_live(p.status()))
    })
    .await
    .unwrap_or(false)
}

async fn signal_pid(pid: u32, signal: Signal) -> bool {
    tokio::task::spawn_blocking(move || {
        let mut system = process_system();
        let pid = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        match system.process(pid) {
            Some(process) => {
                tracing::debug!(target: "service", pid = pid.as_u32(), ?signal, "signalling process");
                process.kill_with(signal).unwrap_or_else(|| process.kill())
            }
            None => false,
        }
    })
    .await
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_port_in_use_detects_listener() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port_in_use(port));
        drop(listener);
        assert!(!port_in_use(port));
    }

    #[tokio::test]
    async fn test_find_pid_of_missing_binary_is_none() {
        let temp = tempfile::TempDir::new().unwrap();
        let process = ManagedProcess {
            binary: temp.path().join("bin").join("proxyctl-test-not-running"),
            config_file: temp.path().join("config.yaml"),
            working_dir: temp.path().to_path_buf(),
            log_file: temp.path().join("logs/proxy.log"),
            port: 1,
            budget: PollBudget::new(2, Duration::from_millis(1)),
        };
        assert_eq!(process.find_pid().await.unwrap(), None);
        assert_eq!(process.wait_until_running().await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_find_and_terminate() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new().unwrap();
        let binary = temp.path().join("proxyctl-fake-proxy");
        std::fs::write(&binary, "#!/bin/sh\necho started \"$@\"\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let process = ManagedProcess {
            binary,
            config_file: temp.path().join("config.yaml"),
            working_dir: temp.path().to_path_buf(),
            log_file: temp.path().join("logs/proxy.log"),
            port: 1,
            budget: PollBudget::new(40, Duration::from_millis(50)),
        };

        let log_file = process.log_file.clone();
        let spawned = process.spawn_detached().unwrap();
        let started = poll_until_true(process.budget, || {
            let log_file = log_file.clone();
            async move {
                std::fs::read_to_string(&log_file).is_ok_and(|log| log.contains("started -config"))
            }
        })
        .await;
        assert!(started);
        assert!(pid_alive(spawned).await);

        assert!(process.terminate(spawned).await);
        assert!(process.wait_until_gone(spawned).await);
    }
}
