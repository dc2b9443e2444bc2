//! Quota aggregation across provider accounts.
//!
//! Every account the proxy uses has a credential file
//! `<provider>-<email>.json` in the auth directory. For each provider the
//! engine reads those files, refreshes expired tokens (writing them back in
//! place), asks the provider's usage API for the account's quota and folds
//! the per-resource numbers into per-group aggregates.
//!
//! - [`credentials`]: credential file parsing, expiry and write-back
//! - [`oauth`]: refresh-token exchange
//! - [`antigravity`], [`codex`], [`gemini`]: the [`QuotaProvider`]s
//! - [`fetcher`]: concurrent fan-out over one provider's accounts
//! - [`cache`]: per-provider TTL cache with background revalidation
//! - [`watcher`]: invalidation on credential file changes
//!
//! One account's failure is recorded on that account's record and never
//! fails the batch.

pub mod antigravity;
pub mod cache;
pub mod codex;
pub mod credentials;
pub mod fetcher;
pub mod gemini;
pub mod oauth;
pub mod watcher;

use crate::config::settings::{ProviderSettings, QuotaSettings};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credentials::Credential;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use cache::QuotaCache;

/// Remaining capacity of one model or usage window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuota {
    pub name: String,
    /// 0 (exhausted) to 100 (untouched)
    pub remaining_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<DateTime<Utc>>,
    pub group: String,
}

impl ResourceQuota {
    pub fn new(
        name: impl Into<String>,
        remaining_percentage: f64,
        reset_time: Option<DateTime<Utc>>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            remaining_percentage: remaining_percentage.clamp(0.0, 100.0),
            reset_time,
            group: group.into(),
        }
    }

    fn is_full(&self) -> bool {
        self.remaining_percentage >= 100.0
    }
}

/// Aggregate of the resources sharing one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupQuota {
    pub name: String,
    pub remaining_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<DateTime<Utc>>,
    pub members: Vec<String>,
}

/// Fold resources into groups, ordered by group name.
///
/// A group's remaining percentage is the minimum over its members. Its reset
/// time is that of the most depleted member that is not full (ties go to the
/// earliest reset); a group whose members are all full has no reset time.
#[must_use]
pub fn compute_groups(resources: &[ResourceQuota]) -> Vec<GroupQuota> {
    let mut by_group: BTreeMap<&str, Vec<&ResourceQuota>> = BTreeMap::new();
    for resource in resources {
        by_group.entry(resource.group.as_str()).or_default().push(resource);
    }

    by_group
        .into_iter()
        .map(|(name, members)| {
            let remaining =
                members.iter().map(|r| r.remaining_percentage).fold(100.0_f64, f64::min);
            let reset_time = members
                .iter()
                .filter(|r| !r.is_full())
                .min_by(|a, b| {
                    a.remaining_percentage
                        .total_cmp(&b.remaining_percentage)
                        .then_with(|| earliest_first(a.reset_time, b.reset_time))
                })
                .and_then(|r| r.reset_time);
            GroupQuota {
                name: name.to_string(),
                remaining_percentage: remaining,
                reset_time,
                members: members.iter().map(|r| r.name.clone()).collect(),
            }
        })
        .collect()
}

fn earliest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

/// Quota of one account. Built fresh on every fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountQuota {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceQuota>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupQuota>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AccountQuota {
    pub fn new(email: impl Into<String>, plan_type: Option<String>, resources: Vec<ResourceQuota>) -> Self {
        let groups = compute_groups(&resources);
        Self {
            email: email.into(),
            plan_type,
            resources,
            groups,
            error: None,
        }
    }

    pub fn failed(email: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            plan_type: None,
            resources: Vec::new(),
            groups: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// All accounts of one provider at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSnapshot {
    pub provider: String,
    /// Sorted by email
    pub accounts: Vec<AccountQuota>,
    pub fetched_at: DateTime<Utc>,
}

/// One upstream usage API.
#[async_trait]
pub trait QuotaProvider: Send + Sync {
    /// Provider name, also the credential file prefix.
    fn name(&self) -> &'static str;

    /// Whether `file_name` is one of this provider's credential files.
    fn owns_file(&self, file_name: &str) -> bool {
        file_name.starts_with(&format!("{}-", self.name())) && file_name.ends_with(".json")
    }

    /// Exchange the credential's refresh token for a new access token and
    /// update `credential` in memory. Persisting is up to the caller.
    async fn refresh_token(&self, credential: &mut Credential) -> Result<()>;

    /// Usage of the account behind a valid `credential`.
    async fn fetch(&self, credential: &Credential) -> Result<AccountQuota>;
}

/// The built-in providers, configured from settings.
pub fn builtin_providers(settings: &QuotaSettings) -> Result<Vec<Arc<dyn QuotaProvider>>> {
    let http = http_client()?;
    let overrides = |name: &str| settings.providers.get(name).cloned().unwrap_or_default();
    Ok(vec![
        Arc::new(antigravity::Antigravity::new(http.clone(), &overrides(antigravity::NAME))),
        Arc::new(codex::Codex::new(http.clone(), &overrides(codex::NAME))),
        Arc::new(gemini::Gemini::new(http, &overrides(gemini::NAME))),
    ])
}

/// HTTP client shared by all providers.
pub fn http_client() -> Result<reqwest::Client> {
    use anyhow::Context;
    reqwest::Client::builder()
        .timeout(crate::constants::QUOTA_HTTP_TIMEOUT)
        .user_agent(concat!("proxyctl/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

/// Endpoint configuration shared by the provider implementations.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub base_url: String,
    pub token_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl Endpoints {
    fn with_overrides(mut self, overrides: &ProviderSettings) -> Self {
        if let Some(url) = &overrides.base_url {
            self.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = &overrides.token_url {
            self.token_url.clone_from(url);
        }
        if overrides.client_id.is_some() {
            self.client_id.clone_from(&overrides.client_id);
        }
        if overrides.client_secret.is_some() {
            self.client_secret.clone_from(&overrides.client_secret);
        }
        self
    }
}

/// Group for a model id: Claude and GPT models share one pool, Gemini
/// models split into Flash and Pro families.
#[must_use]
pub fn model_group(model: &str) -> String {
    let lower = model.to_lowercase();
    if lower.contains("claude") || lower.contains("gpt") {
        "claude-gpt".to_string()
    } else if lower.contains("flash") {
        "gemini-flash".to_string()
    } else if lower.contains("gemini") {
        "gemini-pro".to_string()
    } else {
        lower
    }
}

/// Parse an RFC 3339 timestamp from a JSON value.
pub(crate) fn parse_time(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Turn a non-2xx response into [`ProxyctlError::QuotaApiError`](crate::core::ProxyctlError::QuotaApiError).
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message: String = body.chars().take(200).collect();
    Err(crate::core::ProxyctlError::QuotaApiError {
        status: status.as_u16(),
        message,
    }
    .into())
}
