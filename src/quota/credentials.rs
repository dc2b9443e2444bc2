//! Per-account credential files.
//!
//! Files are owned by the proxy, which writes them after an OAuth login. We
//! only read them and, after a token refresh, write the new access token and
//! expiry back into the same file. Fields we do not understand are kept as-is.
//!
//! Two layouts occur:
//!
//! ```json
//! { "access_token": "...", "refresh_token": "...", "email": "a@x",
//!   "expired": "2026-05-01T10:00:00Z", "project_id": "p-1" }
//! ```
//!
//! and the nested form used by gemini logins:
//!
//! ```json
//! { "email": "a@x", "project_id": "p-1",
//!   "token": { "access_token": "...", "refresh_token": "...", "expiry": "..." } }
//! ```

use crate::constants::TOKEN_EXPIRY_MARGIN_SECS;
use crate::core::ProxyctlError;
use crate::utils::atomic_write;
use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

const EXPIRY_KEYS: [&str; 3] = ["expired", "expiry", "expires_at"];

/// A parsed credential file.
#[derive(Debug, Clone)]
pub struct Credential {
    path: PathBuf,
    /// Account email; falls back to the file name, then the id token.
    pub email: String,
    raw: Value,
}

impl Credential {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| credential_error(path, e))?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(content).map_err(|e| credential_error(path, e))?;
        if !raw.is_object() {
            return Err(credential_error(path, "expected a JSON object"));
        }

        let mut credential = Self {
            path: path.to_path_buf(),
            email: String::new(),
            raw,
        };
        credential.email = credential
            .string("email")
            .map(str::to_string)
            .or_else(|| email_from_file_name(path))
            .or_else(|| credential.id_token_claim("email"))
            .unwrap_or_default();

        if credential.access_token().is_none() && credential.refresh_token().is_none() {
            return Err(credential_error(path, "no access_token or refresh_token"));
        }
        Ok(credential)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Object holding the token fields: `token` when nested, else the root.
    fn tokens(&self) -> &Value {
        match self.raw.get("token") {
            Some(nested) if nested.is_object() => nested,
            _ => &self.raw,
        }
    }

    fn tokens_mut(&mut self) -> Option<&mut Map<String, Value>> {
        let nested = self.raw.get("token").is_some_and(Value::is_object);
        let target = if nested { self.raw.get_mut("token")? } else { &mut self.raw };
        target.as_object_mut()
    }

    /// Top-level string field, then the same field inside `token`.
    fn string(&self, key: &str) -> Option<&str> {
        self.raw
            .get(key)
            .or_else(|| self.tokens().get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn access_token(&self) -> Option<&str> {
        self.string("access_token")
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.string("refresh_token")
    }

    pub fn account_id(&self) -> Option<&str> {
        self.string("account_id")
    }

    pub fn project_id(&self) -> Option<&str> {
        self.string("project_id")
    }

    pub fn client_id(&self) -> Option<&str> {
        self.string("client_id")
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.string("client_secret")
    }

    /// Access token expiry from the explicit field, else the JWT `exp` claim.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        let tokens = self.tokens();
        EXPIRY_KEYS
            .iter()
            .find_map(|key| tokens.get(*key).or_else(|| self.raw.get(*key)).and_then(parse_expiry))
            .or_else(|| self.access_token().and_then(jwt_expiry))
    }

    /// Whether the access token is missing or expires within the safety margin.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        if self.access_token().is_none() {
            return true;
        }
        match self.expiry() {
            Some(expiry) => expiry - chrono::Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS) <= now,
            None => false,
        }
    }

    /// Replace the access token, writing the expiry under whichever key the
    /// file already uses.
    pub fn set_access_token(&mut self, token: &str, expiry: DateTime<Utc>) {
        let Some(tokens) = self.tokens_mut() else {
            return;
        };
        let key = EXPIRY_KEYS.iter().find(|k| tokens.contains_key(**k)).copied().unwrap_or("expired");
        tokens.insert("access_token".into(), Value::String(token.to_string()));
        tokens.insert(key.into(), Value::String(expiry.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)));
    }

    /// Keep a rotated refresh token.
    pub fn set_refresh_token(&mut self, token: &str) {
        if let Some(tokens) = self.tokens_mut() {
            tokens.insert("refresh_token".into(), Value::String(token.to_string()));
        }
    }

    /// Write the credential back to its file.
    pub fn persist(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.raw)?;
        atomic_write(&self.path, content.as_bytes())
    }

    fn id_token_claim(&self, claim: &str) -> Option<String> {
        let token = self.string("id_token")?;
        jwt_claims(token)?.get(claim)?.as_str().map(str::to_string)
    }
}

fn credential_error(path: &Path, reason: impl std::fmt::Display) -> anyhow::Error {
    ProxyctlError::CredentialError {
        file: path.display().to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// `<provider>-<email>.json` → `<email>`, when it looks like an address.
fn email_from_file_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let (_, rest) = stem.split_once('-')?;
    rest.contains('@').then(|| rest.to_string())
}

/// RFC 3339 string, or a Unix timestamp in seconds or milliseconds.
fn parse_expiry(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(s) = value.as_str() {
        return DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc));
    }
    let n = value.as_i64()?;
    if n > 100_000_000_000 {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}

fn jwt_claims(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let exp = jwt_claims(token)?.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}
