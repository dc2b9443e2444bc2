//! Codex (ChatGPT) accounts: rolling usage windows from `wham/usage`.
//!
//! The endpoint reports percent *used* per window; a window resets either at
//! an absolute `reset_at` (Unix seconds) or after `reset_after_seconds`.

use super::credentials::Credential;
use super::oauth::{self, OPENAI_TOKEN_URL};
use super::{AccountQuota, Endpoints, QuotaProvider, ResourceQuota, check_status};
use crate::config::settings::ProviderSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::debug;

pub const NAME: &str = "codex";
pub const DEFAULT_BASE_URL: &str = "https://chatgpt.com";
/// Public client id of the Codex CLI login flow.
pub const DEFAULT_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";

const GROUP: &str = "codex";

pub struct Codex {
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl Codex {
    pub fn new(http: reqwest::Client, overrides: &ProviderSettings) -> Self {
        let endpoints = Endpoints {
            base_url: DEFAULT_BASE_URL.to_string(),
            token_url: OPENAI_TOKEN_URL.to_string(),
            client_id: Some(DEFAULT_CLIENT_ID.to_string()),
            client_secret: None,
        }
        .with_overrides(overrides);
        Self {
            http,
            endpoints,
        }
    }
}

#[async_trait]
impl QuotaProvider for Codex {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn refresh_token(&self, credential: &mut Credential) -> Result<()> {
        oauth::refresh(
            &self.http,
            &self.endpoints.token_url,
            credential,
            self.endpoints.client_id.as_deref(),
            self.endpoints.client_secret.as_deref(),
        )
        .await
    }

    async fn fetch(&self, credential: &Credential) -> Result<AccountQuota> {
        let url = format!("{}/backend-api/wham/usage", self.endpoints.base_url);
        debug!("GET {url} for {}", credential.email);

        let mut request = self.http.get(&url).bearer_auth(credential.access_token().unwrap_or_default());
        if let Some(account_id) = credential.account_id() {
            request = request.header("Chatgpt-Account-Id", account_id);
        }
        let payload: Value = check_status(request.send().await?)
            .await?
            .json()
            .await
            .context("Invalid wham/usage response")?;
        Ok(parse_usage(&credential.email, &payload, Utc::now()))
    }
}

/// Map a `wham/usage` payload to the account's windows.
pub fn parse_usage(email: &str, payload: &Value, now: DateTime<Utc>) -> AccountQuota {
    let plan = payload.get("plan_type").and_then(Value::as_str).map(str::to_string);
    let limits = payload.get("rate_limit");
    let resources = [("primary_window", "five-hour"), ("secondary_window", "weekly")]
        .into_iter()
        .filter_map(|(key, name)| {
            let window = limits?.get(key).filter(|w| w.is_object())?;
            Some(parse_window(name, window, now))
        })
        .collect();
    AccountQuota::new(email, plan, resources)
}

fn parse_window(name: &str, window: &Value, now: DateTime<Utc>) -> ResourceQuota {
    let used = window.get("used_percent").and_then(Value::as_f64).unwrap_or(0.0);
    let reset = window
        .get("reset_at")
        .and_then(Value::as_i64)
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .or_else(|| {
            let after = window.get("reset_after_seconds").and_then(Value::as_i64)?;
            chrono::TimeDelta::try_seconds(after).and_then(|delay| now.checked_add_signed(delay))
        });
    ResourceQuota::new(name, 100.0 - used, reset, GROUP)
}
