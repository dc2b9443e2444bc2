//! Configuration resolution.
//!
//! Every command resolves an [`InstallConfig`] afresh from several layers,
//! lowest priority first:
//!
//! 1. built-in defaults ([`crate::constants`])
//! 2. control-plane settings ([`ControlSettings`], `settings.toml`)
//! 3. the proxy's own `config.yaml` ([`ProxyConfig`])
//! 4. the installation's `.env` (API key)
//! 5. environment variables (`PROXYCTL_*`)
//! 6. command-line flags (`--root`)
//!
//! The API key is the one exception to the ordering: `.env` wins over
//! `PROXYCTL_API_KEY`, because the key in `.env` is the one the running proxy
//! was configured with.
//!
//! The installation root is located by [`ConfigResolver::find_root`]: an
//! explicit override, then a location derived from the running executable,
//! then conventional candidates. Quota commands never need a root; they only
//! need [`ConfigResolver::auth_dir`].

pub mod dotenv;
pub mod proxy_config;
pub mod settings;

pub use proxy_config::ProxyConfig;
pub use settings::ControlSettings;

use crate::constants::{
    BIN_DIR, DEFAULT_AUTH_DIR, DEFAULT_BRANCH, DEFAULT_PROXY_PORT, DEFAULT_REPO_URL,
    DEFAULT_ROUTER_PORT, DOTENV_FILE, FAILED_SUFFIX, BACKUP_SUFFIX, HEALTH_PATH, LOG_DIR,
    LOG_FILE, PLACEHOLDER_API_KEY, PROXY_CONFIG_FILE, SOURCE_DIR, UPDATE_LOCK_FILE,
    proxy_binary_file_name,
};
use crate::core::ProxyctlError;
use crate::utils::{PollBudget, resolve_path};
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Environment variable names read by the resolver.
pub mod env {
    pub const HOME: &str = "PROXYCTL_HOME";
    pub const API_KEY: &str = "PROXYCTL_API_KEY";
    pub const PORT: &str = "PROXYCTL_PORT";
    pub const ROUTER_PORT: &str = "PROXYCTL_ROUTER_PORT";
    pub const AUTH_DIR: &str = "PROXYCTL_AUTH_DIR";
    pub const REPO_URL: &str = "PROXYCTL_REPO_URL";
}

/// Snapshot of the `PROXYCTL_*` environment.
///
/// Captured once so resolution itself is a pure function of its inputs.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub home: Option<String>,
    pub api_key: Option<String>,
    pub port: Option<String>,
    pub router_port: Option<String>,
    pub auth_dir: Option<String>,
    pub repo_url: Option<String>,
}

impl EnvOverrides {
    #[must_use]
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            home: var(env::HOME),
            api_key: var(env::API_KEY),
            port: var(env::PORT),
            router_port: var(env::ROUTER_PORT),
            auth_dir: var(env::AUTH_DIR),
            repo_url: var(env::REPO_URL),
        }
    }
}

/// Fully resolved paths and settings of one installation.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    pub root: PathBuf,
    pub source_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub binary_path: PathBuf,
    pub log_dir: PathBuf,
    pub log_file: PathBuf,
    pub config_file: PathBuf,
    pub dotenv_file: PathBuf,
    pub port: u16,
    pub api_key: String,
    pub router_port: u16,
    pub repo_url: String,
    pub branch: String,
    pub health_budget: PollBudget,
    pub process_budget: PollBudget,
}

impl InstallConfig {
    /// `<bin>.bak`, the previous binary kept for rollback.
    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        sibling_with_suffix(&self.binary_path, BACKUP_SUFFIX)
    }

    /// `<bin>.failed`, a binary that failed verification.
    #[must_use]
    pub fn failed_path(&self) -> PathBuf {
        sibling_with_suffix(&self.binary_path, FAILED_SUFFIX)
    }

    /// Hidden build output path next to the binary (`.<bin>.new`).
    #[must_use]
    pub fn staging_path(&self) -> PathBuf {
        self.bin_dir.join(format!(".{}.new", proxy_binary_file_name()))
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(UPDATE_LOCK_FILE)
    }

    /// Liveness URL of the local proxy.
    #[must_use]
    pub fn health_url(&self) -> String {
        format!("http://127.0.0.1:{}{HEALTH_PATH}", self.port)
    }

    /// Whether the API key came from neither `.env` nor the environment.
    #[must_use]
    pub fn uses_placeholder_key(&self) -> bool {
        self.api_key == PLACEHOLDER_API_KEY
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Whether `dir` looks like an installation root.
#[must_use]
pub fn looks_like_install_root(dir: &Path) -> bool {
    dir.join(PROXY_CONFIG_FILE).is_file() || dir.join(SOURCE_DIR).is_dir() || dir.join(BIN_DIR).is_dir()
}

/// Inputs to configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    /// `--root` flag
    pub root_flag: Option<PathBuf>,
    pub env: EnvOverrides,
    pub settings: ControlSettings,
    /// Path of the running executable
    pub exe_path: Option<PathBuf>,
    pub home: Option<PathBuf>,
}

impl ConfigResolver {
    /// Capture environment, settings file and executable location.
    pub async fn load(root_flag: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            root_flag,
            env: EnvOverrides::from_env(),
            settings: ControlSettings::load().await?,
            exe_path: std::env::current_exe().ok(),
            home: dirs::home_dir(),
        })
    }

    fn explicit_root(&self) -> Result<Option<PathBuf>> {
        if let Some(root) = &self.root_flag {
            return Ok(Some(root.clone()));
        }
        if let Some(home) = &self.env.home {
            return resolve_path(home).map(Some);
        }
        if let Some(root) = &self.settings.install_root {
            return resolve_path(root).map(Some);
        }
        Ok(None)
    }

    fn exe_derived_root(&self) -> Option<PathBuf> {
        let dir = self.exe_path.as_deref()?.parent()?;
        let dir = if dir.file_name().is_some_and(|n| n == BIN_DIR) {
            dir.parent()?
        } else {
            dir
        };
        looks_like_install_root(dir).then(|| dir.to_path_buf())
    }

    /// Conventional installation locations, in search order.
    #[must_use]
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        if let Some(home) = &self.home {
            out.push(home.join("cliproxyapi"));
            out.push(home.join(".cli-proxy-api-home"));
            out.push(home.join(".local").join("share").join("cli-proxy-api"));
        }
        if cfg!(windows) {
            if let Some(local) = dirs::data_local_dir() {
                out.push(local.join("cli-proxy-api"));
            }
        } else {
            out.push(PathBuf::from("/opt/cli-proxy-api"));
        }
        out
    }

    /// Locate an existing installation root.
    pub fn find_root(&self) -> Result<PathBuf> {
        if let Some(root) = self.explicit_root()? {
            tracing::debug!("using explicit installation root {}", root.display());
            return Ok(root);
        }
        if let Some(root) = self.exe_derived_root() {
            tracing::debug!("using installation root next to executable: {}", root.display());
            return Ok(root);
        }

        let candidates = self.candidates();
        if let Some(root) = candidates.iter().find(|c| c.is_dir()) {
            return Ok(root.clone());
        }

        let mut searched = Vec::new();
        if let Some(exe) = &self.exe_path {
            searched.push(format!("next to {}", exe.display()));
        }
        searched.extend(candidates.iter().map(|c| c.display().to_string()));
        Err(ProxyctlError::InstallRootNotFound {
            searched,
        }
        .into())
    }

    /// Root used by `install` when nothing exists yet: the explicit override,
    /// else the first conventional candidate.
    pub fn install_target(&self) -> Result<PathBuf> {
        if let Some(root) = self.explicit_root()? {
            return Ok(root);
        }
        if let Ok(root) = self.find_root() {
            return Ok(root);
        }
        self.candidates().into_iter().next().ok_or_else(|| {
            anyhow::anyhow!("Cannot choose an installation root; pass --root or set PROXYCTL_HOME")
        })
    }

    /// Locate the root and resolve the configuration under it.
    pub fn resolve(&self) -> Result<InstallConfig> {
        let root = self.find_root()?;
        self.resolve_at(root)
    }

    /// Resolve the configuration of the installation at `root`.
    pub fn resolve_at(&self, root: PathBuf) -> Result<InstallConfig> {
        let config_file = root.join(PROXY_CONFIG_FILE);
        let dotenv_file = root.join(DOTENV_FILE);
        let proxy_config = ProxyConfig::load(&config_file)?.unwrap_or_default();
        let dotenv = dotenv::load(&dotenv_file)?;

        let api_key = dotenv::api_key(&dotenv)
            .or_else(|| self.env.api_key.clone())
            .unwrap_or_else(|| PLACEHOLDER_API_KEY.to_string());

        let port = match &self.env.port {
            Some(raw) => parse_port(env::PORT, raw)?,
            None => proxy_config.port.unwrap_or(DEFAULT_PROXY_PORT),
        };
        let router_port = match &self.env.router_port {
            Some(raw) => parse_port(env::ROUTER_PORT, raw)?,
            None => DEFAULT_ROUTER_PORT,
        };

        let repo_url = self
            .env
            .repo_url
            .clone()
            .or_else(|| self.settings.repo_url.clone())
            .unwrap_or_else(|| DEFAULT_REPO_URL.to_string());
        let branch = self.settings.branch.clone().unwrap_or_else(|| DEFAULT_BRANCH.to_string());

        let bin_dir = root.join(BIN_DIR);
        let log_dir = root.join(LOG_DIR);
        Ok(InstallConfig {
            source_dir: root.join(SOURCE_DIR),
            binary_path: bin_dir.join(proxy_binary_file_name()),
            log_file: log_dir.join(LOG_FILE),
            bin_dir,
            log_dir,
            config_file,
            dotenv_file,
            port,
            api_key,
            router_port,
            repo_url,
            branch,
            health_budget: self.settings.health.budget(),
            process_budget: self.settings.process.budget(),
            root,
        })
    }

    /// Credential directory for quota: `PROXYCTL_AUTH_DIR`, then `auth-dir`
    /// from `config.yaml` when a root resolves, then `~/.cli-proxy-api`.
    pub fn auth_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.env.auth_dir {
            return resolve_path(dir);
        }
        if let Ok(root) = self.find_root()
            && let Ok(Some(cfg)) = ProxyConfig::load(&root.join(PROXY_CONFIG_FILE))
            && let Some(dir) = cfg.auth_dir
        {
            return resolve_path(&dir);
        }
        let home = self
            .home
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?;
        Ok(home.join(DEFAULT_AUTH_DIR))
    }
}

fn parse_port(var: &str, raw: &str) -> Result<u16> {
    raw.trim().parse::<u16>().map_err(|_| {
        ProxyctlError::ConfigParseError {
            file: var.to_string(),
            reason: format!("'{raw}' is not a valid port"),
        }
        .into()
    })
}
