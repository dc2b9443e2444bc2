//! OAuth refresh-token exchange.

use super::credentials::Credential;
use crate::core::ProxyctlError;
use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::debug;

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const OPENAI_TOKEN_URL: &str = "https://auth.openai.com/oauth/token";

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Upper bound applied to `expires_in` (one year).
const MAX_EXPIRES_IN: i64 = 365 * 24 * 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Exchange `credential`'s refresh token at `token_url` and update it in
/// memory. The client id and secret come from the credential file first,
/// then from the provider's settings.
pub async fn refresh(
    http: &reqwest::Client,
    token_url: &str,
    credential: &mut Credential,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> Result<()> {
    let refresh_token = credential.refresh_token().ok_or_else(|| ProxyctlError::TokenRefreshFailed {
        reason: format!("{} has no refresh_token", credential.email),
    })?;

    let mut form = vec![("grant_type", "refresh_token".to_string()), ("refresh_token", refresh_token.to_string())];
    if let Some(id) = credential.client_id().or(client_id) {
        form.push(("client_id", id.to_string()));
    }
    if let Some(secret) = credential.client_secret().or(client_secret) {
        form.push(("client_secret", secret.to_string()));
    }

    debug!("refreshing token for {} at {token_url}", credential.email);
    let response = http.post(token_url).form(&form).send().await.map_err(|e| failed(&e))?;
    let status = response.status();
    if !status.is_success() {
        let body: String = response.text().await.unwrap_or_default().chars().take(200).collect();
        return Err(ProxyctlError::TokenRefreshFailed {
            reason: format!("HTTP {}: {body}", status.as_u16()),
        }
        .into());
    }
    let token: TokenResponse = response.json().await.map_err(|e| failed(&e))?;

    let expiry = expiry_after(Utc::now(), token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN));
    credential.set_access_token(&token.access_token, expiry);
    if let Some(rotated) = token.refresh_token.as_deref().filter(|t| !t.is_empty()) {
        credential.set_refresh_token(rotated);
    }
    Ok(())
}

/// Expiry `expires_in` seconds after `now`, clamped to `0..=MAX_EXPIRES_IN`.
fn expiry_after(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    TimeDelta::try_seconds(expires_in.clamp(0, MAX_EXPIRES_IN))
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(now)
}

fn failed(e: &reqwest::Error) -> anyhow::Error {
    ProxyctlError::TokenRefreshFailed {
        reason: e.to_string(),
    }
    .into()
}
