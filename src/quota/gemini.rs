//! Gemini CLI accounts: request buckets from cloudcode `retrieveUserQuota`.

use super::credentials::Credential;
use super::oauth::{self, GOOGLE_TOKEN_URL};
use super::{AccountQuota, Endpoints, QuotaProvider, ResourceQuota, check_status, model_group, parse_time};
use crate::config::settings::ProviderSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::debug;

pub const NAME: &str = "gemini";
pub const DEFAULT_BASE_URL: &str = "https://cloudcode-pa.googleapis.com";

pub struct Gemini {
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl Gemini {
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
impl QuotaProvider for Gemini {
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
        let url = format!("{}/v1internal:retrieveUserQuota", self.endpoints.base_url);
        let body = json!({ "project": credential.project_id().unwrap_or_default() });
        debug!("POST {url} for {}", credential.email);

        let response = self
            .http
            .post(&url)
            .bearer_auth(credential.access_token().unwrap_or_default())
            .json(&body)
            .send()
            .await?;
        let payload: Value =
            check_status(response).await?.json().await.context("Invalid retrieveUserQuota response")?;
        Ok(AccountQuota::new(credential.email.clone(), None, parse_buckets(&payload)))
    }
}

/// Request buckets by model. A model listed twice keeps its lowest bucket.
pub fn parse_buckets(payload: &Value) -> Vec<ResourceQuota> {
    let Some(buckets) = payload.get("buckets").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut by_model: BTreeMap<String, ResourceQuota> = BTreeMap::new();
    for bucket in buckets {
        let token_type = bucket.get("tokenType").and_then(Value::as_str).unwrap_or("REQUESTS");
        if token_type != "REQUESTS" {
            continue;
        }
        let Some(model) = bucket.get("modelId").and_then(Value::as_str) else {
            continue;
        };
        let reset = bucket.get("resetTime").and_then(parse_time);
        let fraction = bucket.get("remainingFraction").and_then(Value::as_f64).unwrap_or(if reset.is_some() {
            0.0
        } else {
            1.0
        });
        let resource = ResourceQuota::new(model, fraction * 100.0, reset, model_group(model));
        match by_model.get(model) {
            Some(existing) if existing.remaining_percentage <= resource.remaining_percentage => {}
            _ => {
                by_model.insert(model.to_string(), resource);
            }
        }
    }
    by_model.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_buckets() {
        let payload = json!({
            "buckets": [
                {"modelId": "gemini-2.5-pro", "tokenType": "REQUESTS", "remainingFraction": 0.5, "resetTime": "2026-05-02T00:00:00Z"},
                {"modelId": "gemini-2.5-pro", "tokenType": "REQUESTS", "remainingFraction": 0.75},
                {"modelId": "gemini-2.5-flash", "tokenType": "REQUESTS", "remainingFraction": 1.0},
                {"modelId": "gemini-2.5-flash", "tokenType": "TOKENS", "remainingFraction": 0.1}
            ]
        });
        let resources = parse_buckets(&payload);
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].name, "gemini-2.5-flash");
        assert_eq!(resources[0].remaining_percentage, 100.0);
        assert_eq!(resources[0].group, "gemini-flash");
        assert_eq!(resources[1].remaining_percentage, 50.0);
        assert_eq!(resources[1].group, "gemini-pro");
        assert!(resources[1].reset_time.is_some());
    }
}
