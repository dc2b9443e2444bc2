//! Version facts about an installation.
//!
//! Four independent facts make up a [`VersionSnapshot`]: the checked-out
//! source revision, the installed binary, the running instance and the
//! backup binary. Each is a [`VersionFact`], either a known version string
//! or a sentinel explaining why it is not known. Snapshots are computed on
//! demand and never persisted.
//!
//! Binary versions come from the [`BuildStamp`] written next to every binary
//! proxyctl builds (`<binary>.version`). Binaries without a stamp are asked
//! with `--version`.

use crate::config::InstallConfig;
use crate::constants::VERSION_PROBE_TIMEOUT;
use crate::service::HealthProbe;
use crate::source::SourceTree;
use crate::utils::atomic_write;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One version fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "kebab-case")]
pub enum VersionFact {
    Known(String),
    /// Nothing to ask: no checkout, no binary, no version reported.
    Absent,
    /// The thing exists but could not be queried.
    Unreachable,
    TimedOut,
}

impl VersionFact {
    #[must_use]
    pub fn known(&self) -> Option<&str> {
        match self {
            Self::Known(v) => Some(v),
            _ => None,
        }
    }

    /// Both facts are known and name the same version (a leading `v` is
    /// ignored).
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        match (self.known(), other.known()) {
            (Some(a), Some(b)) => normalize(a) == normalize(b),
            _ => false,
        }
    }
}

fn normalize(version: &str) -> &str {
    let version = version.trim();
    version.strip_prefix('v').unwrap_or(version)
}

impl fmt::Display for VersionFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(v) => f.write_str(v),
            Self::Absent => f.write_str("absent"),
            Self::Unreachable => f.write_str("unreachable"),
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionSnapshot {
    pub source: VersionFact,
    pub binary: VersionFact,
    pub running: VersionFact,
    pub backup: VersionFact,
}

/// Build metadata stamped into a binary and mirrored in `<binary>.version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStamp {
    pub version: String,
    pub commit: String,
    pub build_date: String,
}

impl BuildStamp {
    #[must_use]
    pub fn path_for(binary: &Path) -> PathBuf {
        let mut name = binary.file_name().unwrap_or_default().to_os_string();
        name.push(".version");
        binary.with_file_name(name)
    }

    pub fn read(binary: &Path) -> Result<Option<Self>> {
        let path = Self::path_for(binary);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let stamp = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed build stamp {}", path.display()))?;
        Ok(Some(stamp))
    }

    pub fn write(&self, binary: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        atomic_write(&Self::path_for(binary), &json)
    }
}

/// Reports the version embedded in a binary on disk.
#[async_trait]
pub trait BinaryProbe: Send + Sync {
    async fn probe(&self, binary: &Path) -> VersionFact;
}

/// Reads the build stamp, falling back to running `<binary> --version`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecBinaryProbe;

/// Extract a version string from `--version` style output.
#[must_use]
pub fn parse_version_output(output: &str) -> Option<String> {
    let re = Regex::new(r"(?i)version[:=\s]+(v?\d[\w.+\-]*)").ok()?;
    re.captures(output).map(|c| c[1].to_string())
}

#[async_trait]
impl BinaryProbe for ExecBinaryProbe {
    async fn probe(&self, binary: &Path) -> VersionFact {
        if !binary.is_file() {
            return VersionFact::Absent;
        }
        match BuildStamp::read(binary) {
            Ok(Some(stamp)) => return VersionFact::Known(stamp.version),
            Ok(None) => {}
            Err(e) => tracing::warn!("{e:#}"),
        }

        let mut cmd = tokio::process::Command::new(binary);
        cmd.arg("--version").stdin(std::process::Stdio::null()).kill_on_drop(true);
        match tokio::time::timeout(VERSION_PROBE_TIMEOUT, cmd.output()).await {
            Err(_) => VersionFact::TimedOut,
            Ok(Err(e)) => {
                tracing::debug!("{} --version failed: {e}", binary.display());
                VersionFact::Unreachable
            }
            Ok(Ok(output)) => {
                let text = format!(
                    "{}\n{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );
                parse_version_output(&text).map_or(VersionFact::Unreachable, VersionFact::Known)
            }
        }
    }
}

/// Computes [`VersionSnapshot`]s from the collaborators that know each fact.
#[derive(Clone)]
pub struct VersionTracker {
    source: Arc<dyn SourceTree>,
    binary: Arc<dyn BinaryProbe>,
    health: Arc<dyn HealthProbe>,
}

impl VersionTracker {
    pub fn new(
        source: Arc<dyn SourceTree>,
        binary: Arc<dyn BinaryProbe>,
        health: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            source,
            binary,
            health,
        }
    }

    pub async fn source_version(&self) -> VersionFact {
        match self.source.current().await {
            Ok(Some(rev)) => VersionFact::Known(rev.version),
            Ok(None) => VersionFact::Absent,
            Err(e) => {
                tracing::warn!("could not read source revision: {e:#}");
                VersionFact::Unreachable
            }
        }
    }

    pub async fn binary_version(&self, binary: &Path) -> VersionFact {
        self.binary.probe(binary).await
    }

    pub async fn snapshot(&self, cfg: &InstallConfig) -> VersionSnapshot {
        let backup_path = cfg.backup_path();
        let health_url = cfg.health_url();
        let (source, binary, running, backup) = tokio::join!(
            self.source_version(),
            self.binary.probe(&cfg.binary_path),
            self.health.running_version(&health_url),
            self.binary.probe(&backup_path),
        );
        VersionSnapshot {
            source,
            binary,
            running,
            backup,
        }
    }
}
