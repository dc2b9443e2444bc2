//! Read-only view of the managed proxy's `config.yaml`.
//!
//! Only the keys proxyctl cares about are modelled; everything else in the
//! file is ignored and never rewritten.

use crate::core::ProxyctlError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ProxyConfig {
    #[serde(default)]
    pub port: Option<u16>,

    /// Directory holding per-account credential files.
    #[serde(default, rename = "auth-dir")]
    pub auth_dir: Option<String>,
}

impl ProxyConfig {
    /// Load `path`, returning `None` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        Self::parse(&content, path).map(Some)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| {
            ProxyctlError::ConfigParseError {
                file: path.display().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Default `config.yaml` written by `install` when the source tree ships no example.
#[must_use]
pub fn render_default(port: u16, auth_dir: &str, api_key: &str) -> String {
    format!(
        "port: {port}\n\
         auth-dir: \"{auth_dir}\"\n\
         debug: false\n\
         api-keys:\n  - \"{api_key}\"\n"
    )
}
