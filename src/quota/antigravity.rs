//! Antigravity accounts: per-model quota from the cloudcode
//! `fetchAvailableModels` endpoint.
//!
//! ```json
//! { "models": { "claude-sonnet-4-5": { "quotaInfo": { "remainingFraction": 0.8,
//!                                                      "resetTime": "2026-05-01T12:00:00Z" } } } }
//! ```
//!
//! A model with a reset time but no fraction is exhausted; models without
//! `quotaInfo` are not metered and are skipped.

use super::credentials::Credential;
use super::oauth::{self, GOOGLE_TOKEN_URL};
use super::{AccountQuota, Endpoints, QuotaProvider, ResourceQuota, check_status, model_group, parse_time};
use crate::config::settings::ProviderSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

pub const NAME: &str = "antigravity";
pub const DEFAULT_BASE_URL: &str = "https://cloudcode-pa.googleapis.com";

pub struct Antigravity {
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl Antigravity {
    pub fn new(http: reqwest::Client, overrides: &ProviderSettings) -> Self {
        let endpoints = Endpoints {
            base_url: DEFAULT_BASE_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            client_id: None,
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
impl QuotaProvider for Antigravity {
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
        let url = format!("{}/v1internal:fetchAvailableModels", self.endpoints.base_url);
        let token = credential.access_token().unwrap_or_default();
        let body = match credential.project_id() {
            Some(project) => json!({ "project": project }),
            None => json!({}),
        };
        debug!("POST {url} for {}", credential.email);

        let response = self.http.post(&url).bearer_auth(token).json(&body).send().await?;
        let payload: Value = check_status(response)
            .await?
            .json()
            .await
            .context("Invalid fetchAvailableModels response")?;
        Ok(AccountQuota::new(credential.email.clone(), None, parse_models(&payload)))
    }
}

/// Map the `models` object to resources, sorted by model name.
pub fn parse_models(payload: &Value) -> Vec<ResourceQuota> {
    let Some(models) = payload.get("models").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut resources: Vec<ResourceQuota> = models
        .iter()
        .filter_map(|(name, model)| {
            let info = model.get("quotaInfo")?;
            let reset = info.get("resetTime").and_then(parse_time);
            let fraction = match info.get("remainingFraction").and_then(Value::as_f64) {
                Some(f) => f,
                None if reset.is_some() => 0.0,
                None => return None,
            };
            Some(ResourceQuota::new(name.clone(), fraction * 100.0, reset, model_group(name)))
        })
        .collect();
    resources.sort_by(|a, b| a.name.cmp(&b.name));
    resources
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_models() {
        let payload = json!({
            "models": {
                "gemini-2.5-flash": {"quotaInfo": {"remainingFraction": 1.0}},
                "claude-sonnet-4-5": {"quotaInfo": {"remainingFraction": 0.25, "resetTime": "2026-05-01T12:00:00Z"}},
                "gpt-oss-120b-medium": {"quotaInfo": {"resetTime": "2026-05-01T14:00:00Z"}},
                "chat_20706": {}
            }
        });
        let resources = parse_models(&payload);
        let names: Vec<_> = resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["claude-sonnet-4-5", "gemini-2.5-flash", "gpt-oss-120b-medium"]);
        assert_eq!(resources[0].remaining_percentage, 25.0);
        assert_eq!(resources[0].group, "claude-gpt");
        assert_eq!(resources[2].remaining_percentage, 0.0);

        let account = AccountQuota::new("a@x", None, resources);
        let pool = account.groups.iter().find(|g| g.name == "claude-gpt").unwrap();
        assert_eq!(pool.remaining_percentage, 0.0);
        assert_eq!(pool.reset_time.unwrap().to_rfc3339(), "2026-05-01T14:00:00+00:00");
    }

    #[test]
    fn test_missing_models_is_empty() {
        assert!(parse_models(&json!({})).is_empty());
    }
}
