//! Control-plane settings (`settings.toml`).
//!
//! This file configures proxyctl itself, not the managed proxy. It is
//! optional; every field has a default. Location:
//!
//! - `$PROXYCTL_SETTINGS` when set
//! - otherwise `<config_dir>/proxyctl/settings.toml`
//!   (`~/.config` on Linux, `~/Library/Application Support` on macOS,
//!   `%APPDATA%` on Windows)
//!
//! ```toml
//! install_root = "~/cliproxyapi"
//! repo_url = "https://github.com/router-for-me/CLIProxyAPI.git"
//! branch = "main"
//!
//! [health]
//! attempts = 30
//! interval_ms = 1000
//!
//! [quota]
//! ttl_secs = 300
//! web_port = 8319
//!
//! [quota.providers.antigravity]
//! client_id = "<oauth client id>"
//! client_secret = "<oauth client secret>"
//! ```

use crate::constants::{
    DEFAULT_QUOTA_PORT, HEALTH_ATTEMPTS, HEALTH_INTERVAL, PROCESS_POLL_ATTEMPTS,
    PROCESS_POLL_INTERVAL, QUOTA_CACHE_TTL,
};
use crate::core::ProxyctlError;
use crate::utils::PollBudget;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Environment variable overriding the settings file location.
pub const SETTINGS_ENV: &str = "PROXYCTL_SETTINGS";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ControlSettings {
    /// Installation root used when neither `--root` nor `PROXYCTL_HOME` is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_root: Option<String>,

    /// Upstream repository of the proxy source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,

    /// Branch tracked by `update`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default = "PollSettings::health")]
    pub health: PollSettings,

    /// Budget for waiting on the process to appear/disappear.
    #[serde(default = "PollSettings::process")]
    pub process: PollSettings,

    #[serde(default)]
    pub quota: QuotaSettings,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PollSettings {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl PollSettings {
    fn health() -> Self {
        Self {
            attempts: HEALTH_ATTEMPTS,
            interval_ms: HEALTH_INTERVAL.as_millis() as u64,
        }
    }

    fn process() -> Self {
        Self {
            attempts: PROCESS_POLL_ATTEMPTS,
            interval_ms: PROCESS_POLL_INTERVAL.as_millis() as u64,
        }
    }

    #[must_use]
    pub fn budget(&self) -> PollBudget {
        PollBudget::new(self.attempts, Duration::from_millis(self.interval_ms))
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::health()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct QuotaSettings {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    /// Per-provider endpoint and OAuth client overrides, keyed by provider name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub providers: BTreeMap<String, ProviderSettings>,
}

/// Overrides for one quota provider. Unset fields use built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProviderSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

const fn default_ttl_secs() -> u64 {
    QUOTA_CACHE_TTL.as_secs()
}

const fn default_web_port() -> u16 {
    DEFAULT_QUOTA_PORT
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            web_port: default_web_port(),
            providers: BTreeMap::new(),
        }
    }
}

impl ControlSettings {
    /// Load from the default location; a missing file yields defaults.
    pub async fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path).await
        } else {
            tracing::debug!("no settings file at {}", path.display());
            Ok(Self::defaults())
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;

        toml::from_str(&content).map_err(|e| {
            ProxyctlError::ConfigParseError {
                file: path.display().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Settings with every default filled in.
    ///
    /// `Default::default()` would zero the poll budgets; this goes through the
    /// serde defaults instead.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            health: PollSettings::health(),
            process: PollSettings::process(),
            ..Self::default()
        }
    }

    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(SETTINGS_ENV) {
            return Ok(PathBuf::from(path));
        }
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine configuration directory"))?;
        Ok(dir.join("proxyctl").join("settings.toml"))
    }

    #[must_use]
    pub fn quota_ttl(&self) -> Duration {
        Duration::from_secs(self.quota.ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_empty_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.toml");
        std::fs::write(&path, "").unwrap();

        let settings = ControlSettings::load_from(&path).await.unwrap();
        assert_eq!(settings, ControlSettings::defaults());
        assert_eq!(settings.health.budget().attempts, HEALTH_ATTEMPTS);
        assert_eq!(settings.quota_ttl(), QUOTA_CACHE_TTL);
    }

    #[tokio::test]
    async fn test_partial_override() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.toml");
        std::fs::write(
            &path,
            "branch = \"dev\"\n[health]\nattempts = 5\ninterval_ms = 10\n[quota]\nttl_secs = 60\n",
        )
        .unwrap();

        let settings = ControlSettings::load_from(&path).await.unwrap();
        assert_eq!(settings.branch.as_deref(), Some("dev"));
        assert_eq!(settings.health.budget(), PollBudget::new(5, Duration::from_millis(10)));
        assert_eq!(settings.process, PollSettings::process());
        assert_eq!(settings.quota.ttl_secs, 60);
        assert_eq!(settings.quota.web_port, DEFAULT_QUOTA_PORT);
    }

    #[tokio::test]
    async fn test_provider_overrides() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.toml");
        std::fs::write(
            &path,
            "[quota.providers.gemini]\nbase_url = \"http://127.0.0.1:9000\"\nclient_id = \"id\"\n",
        )
        .unwrap();

        let settings = ControlSettings::load_from(&path).await.unwrap();
        let gemini = &settings.quota.providers["gemini"];
        assert_eq!(gemini.base_url.as_deref(), Some("http://127.0.0.1:9000"));
        assert_eq!(gemini.client_id.as_deref(), Some("id"));
        assert_eq!(gemini.token_url, None);
    }

    #[tokio::test]
    async fn test_unknown_key_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.toml");
        std::fs::write(&path, "brnach = \"dev\"\n").unwrap();

        let err = ControlSettings::load_from(&path).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProxyctlError>(),
            Some(ProxyctlError::ConfigParseError { .. })
        ));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_settings_path_from_environment() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.toml");
        std::fs::write(&path, "repo_url = \"https://example.invalid/proxy.git\"\n").unwrap();

        let saved = std::env::var_os(SETTINGS_ENV);
        // SAFETY: serialized with every other test touching the environment.
        unsafe { std::env::set_var(SETTINGS_ENV, &path) };
        let resolved = ControlSettings::default_path();
        let loaded = ControlSettings::load().await;
        unsafe {
            match saved {
                Some(value) => std::env::set_var(SETTINGS_ENV, value),
                None => std::env::remove_var(SETTINGS_ENV),
            }
        }

        assert_eq!(resolved.unwrap(), path);
        assert_eq!(loaded.unwrap().repo_url.as_deref(), Some("https://example.invalid/proxy.git"));
    }
}
