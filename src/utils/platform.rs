//! Platform probing.
//!
//! Everything the service layer needs to pick an implementation lives here:
//! operating system, WSL detection, whether PID 1 is systemd, and tool lookup
//! on `PATH`.

use anyhow::Result;
use std::path::{Path, PathBuf};

/// Checks if the current platform is Windows.
#[must_use]
pub const fn is_windows() -> bool {
    cfg!(windows)
}

/// Checks if the current platform is macOS.
#[must_use]
pub const fn is_macos() -> bool {
    cfg!(target_os = "macos")
}

/// Expand `~` and environment variables in a user-supplied path.
pub fn resolve_path(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path)
        .map_err(|e| anyhow::anyhow!("Failed to expand path '{path}': {e}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Whether `cmd` resolves on `PATH`.
#[must_use]
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Full path of `cmd` on `PATH`, if any.
#[must_use]
pub fn find_command(cmd: &str) -> Option<PathBuf> {
    which::which(cmd).ok()
}

/// Facts about the host that decide which service manager is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformFacts {
    pub os: HostOs,
    /// Running under Windows Subsystem for Linux
    pub wsl: bool,
    /// PID 1 is systemd (the init system actually manages services)
    pub systemd_pid1: bool,
    /// `systemctl` is on PATH
    pub has_systemctl: bool,
    /// `launchctl` is on PATH
    pub has_launchctl: bool,
    /// `schtasks` is on PATH
    pub has_schtasks: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostOs {
    MacOs,
    Linux,
    Windows,
    #[default]
    Other,
}

impl PlatformFacts {
    /// Probe the running host.
    #[must_use]
    pub fn detect() -> Self {
        let os = if is_macos() {
            HostOs::MacOs
        } else if is_windows() {
            HostOs::Windows
        } else if cfg!(target_os = "linux") {
            HostOs::Linux
        } else {
            HostOs::Other
        };

        let facts = Self {
            os,
            wsl: os == HostOs::Linux && detect_wsl(),
            systemd_pid1: os == HostOs::Linux && pid1_is_systemd(Path::new("/proc/1/comm")),
            has_systemctl: os == HostOs::Linux && command_exists("systemctl"),
            has_launchctl: os == HostOs::MacOs && command_exists("launchctl"),
            has_schtasks: os == HostOs::Windows && command_exists("schtasks"),
        };
        tracing::debug!(?facts, "detected platform");
        facts
    }
}

fn detect_wsl() -> bool {
    if std::env::var_os("WSL_DISTRO_NAME").is_some() || std::env::var_os("WSL_INTEROP").is_some() {
        return true;
    }
    std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|release| is_wsl_kernel_release(&release))
        .unwrap_or(false)
}

/// WSL kernels carry "microsoft" in their release string.
#[must_use]
pub fn is_wsl_kernel_release(release: &str) -> bool {
    let lower = release.to_lowercase();
    lower.contains("microsoft") || lower.contains("wsl")
}

/// Reads the command name of PID 1 from `comm_path` (normally `/proc/1/comm`).
#[must_use]
pub fn pid1_is_systemd(comm_path: &Path) -> bool {
    std::fs::read_to_string(comm_path).map(|comm| comm.trim() == "systemd").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_wsl_kernel_release() {
        assert!(is_wsl_kernel_release("5.15.153.1-microsoft-standard-WSL2"));
        assert!(is_wsl_kernel_release("4.4.0-19041-Microsoft"));
        assert!(!is_wsl_kernel_release("6.8.0-45-generic"));
    }

    #[test]
    fn test_pid1_is_systemd() {
        let temp = TempDir::new().unwrap();
        let comm = temp.path().join("comm");

        std::fs::write(&comm, "systemd\n").unwrap();
        assert!(pid1_is_systemd(&comm));

        std::fs::write(&comm, "init\n").unwrap();
        assert!(!pid1_is_systemd(&comm));

        assert!(!pid1_is_systemd(&temp.path().join("missing")));
    }

    #[test]
    fn test_resolve_path_expands_home() {
        let home = dirs::home_dir().unwrap();
        let resolved = resolve_path("~/cliproxyapi").unwrap();
        assert_eq!(resolved, home.join("cliproxyapi"));
    }

    #[test]
    fn test_resolve_path_plain() {
        assert_eq!(resolve_path("/opt/x").unwrap(), PathBuf::from("/opt/x"));
    }
}
