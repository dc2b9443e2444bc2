//! Provider adapters against a mock upstream, read back through the HTTP API.

use crate::{local_client, serve, write_json};
use axum::extract::{Form, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use proxyctl::config::settings::ProviderSettings;
use proxyctl::quota::antigravity::Antigravity;
use proxyctl::quota::codex::Codex;
use proxyctl::quota::fetcher::QuotaFetcher;
use proxyctl::quota::{QuotaCache, QuotaProvider};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Clone, Default)]
struct Upstream {
    refreshes: Arc<AtomicU32>,
}

async fn token(State(upstream): State<Upstream>, Form(form): Form<HashMap<String, String>>) -> Response {
    upstream.refreshes.fetch_add(1, Ordering::SeqCst);
    let grant = form.get("grant_type").map(String::as_str);
    match (grant, form.get("refresh_token").map(String::as_str)) {
        (Some("refresh_token"), Some("rt-b")) => {
            Json(json!({"access_token": "at-b-new", "expires_in": 3600})).into_response()
        }
        _ => (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"}))).into_response(),
    }
}

fn bearer(headers: &HeaderMap) -> &str {
    headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()).unwrap_or_default()
}

async fn available_models(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    match (bearer(&headers), body["project"].as_str()) {
        ("Bearer at-a", Some("proj-a")) => Json(json!({
            "models": {
                "claude-sonnet-4-5": {"quotaInfo": {"remainingFraction": 0.8, "resetTime": "2030-01-01T00:00:00Z"}},
                "chat_internal": {}
            }
        }))
        .into_response(),
        ("Bearer at-b-new", _) => Json(json!({
            "models": {
                "gemini-2.5-pro": {"quotaInfo": {"remainingFraction": 0.5, "resetTime": "2030-01-01T05:00:00Z"}},
                "gemini-3-pro-preview": {"quotaInfo": {"remainingFraction": 0.2, "resetTime": "2030-01-01T03:00:00Z"}},
                "gemini-2.5-flash": {"quotaInfo": {"remainingFraction": 1.0}}
            }
        }))
        .into_response(),
        _ => (StatusCode::UNAUTHORIZED, "invalid credentials").into_response(),
    }
}

async fn antigravity_upstream() -> (String, Upstream) {
    let upstream = Upstream::default();
    let router = Router::new()
        .route("/token", post(token))
        .route("/v1internal:fetchAvailableModels", post(available_models))
        .with_state(upstream.clone());
    (serve(router).await, upstream)
}

fn overrides(base: &str) -> ProviderSettings {
    ProviderSettings {
        base_url: Some(base.to_string()),
        token_url: Some(format!("{base}/token")),
        client_id: Some("test-client".into()),
        client_secret: Some("test-secret".into()),
    }
}

async fn serve_cache(provider: Arc<dyn QuotaProvider>, auth_dir: &std::path::Path) -> (String, Arc<QuotaCache>) {
    let cache = Arc::new(QuotaCache::new(
        vec![provider],
        QuotaFetcher::new(auth_dir).with_batch_timeout(Duration::from_secs(10)),
        Duration::from_secs(300),
    ));
    let url = serve(proxyctl::server::router(Arc::clone(&cache))).await;
    (url, cache)
}

async fn get_json(url: &str) -> (StatusCode, Value) {
    let response = local_client().get(url).send().await.unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_antigravity_refreshes_expired_account_and_serves_both() {
    let (base, upstream) = antigravity_upstream().await;
    let dir = TempDir::new().unwrap();
    let future = (Utc::now() + chrono::Duration::hours(2)).to_rfc3339();
    write_json(
        dir.path(),
        "antigravity-b@x.json",
        &json!({"email": "b@x", "access_token": "at-b-old", "refresh_token": "rt-b",
                "expired": "2020-01-01T00:00:00Z", "type": "antigravity"}),
    );
    write_json(
        dir.path(),
        "antigravity-a@x.json",
        &json!({"email": "a@x", "access_token": "at-a", "refresh_token": "rt-a",
                "expired": future, "project_id": "proj-a"}),
    );

    let provider = Arc::new(Antigravity::new(local_client(), &overrides(&base)));
    let (url, _cache) = serve_cache(provider, dir.path()).await;
    let (status, body) = get_json(&format!("{url}/api/quota/antigravity")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    let accounts = body["accounts"].as_array().unwrap();
    let emails: Vec<_> = accounts.iter().map(|a| a["email"].as_str().unwrap()).collect();
    assert_eq!(emails, vec!["a@x", "b@x"]);
    assert!(accounts.iter().all(|a| a.get("error").is_none()), "{body}");

    let a_groups = accounts[0]["groups"].as_array().unwrap();
    assert_eq!(a_groups.len(), 1);
    assert_eq!(a_groups[0]["name"], "claude-gpt");
    assert_eq!(a_groups[0]["remainingPercentage"], 80.0);

    // gemini-pro: the lower member wins and carries its own reset time
    let pro = accounts[1]["groups"].as_array().unwrap().iter().find(|g| g["name"] == "gemini-pro").unwrap();
    assert_eq!(pro["remainingPercentage"], 20.0);
    let reset: DateTime<Utc> = pro["resetTime"].as_str().unwrap().parse().unwrap();
    assert_eq!(reset.to_rfc3339(), "2030-01-01T03:00:00+00:00");

    // Only b needed a refresh, and the new token was written back.
    assert_eq!(upstream.refreshes.load(Ordering::SeqCst), 1);
    let saved: Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("antigravity-b@x.json")).unwrap()).unwrap();
    assert_eq!(saved["access_token"], "at-b-new");
    assert_eq!(saved["refresh_token"], "rt-b");
    assert_eq!(saved["type"], "antigravity");
    let expiry: DateTime<Utc> = saved["expired"].as_str().unwrap().parse().unwrap();
    assert!(expiry > Utc::now() + chrono::Duration::minutes(30));
}

#[tokio::test]
async fn test_revoked_refresh_token_fails_only_that_account() {
    let (base, _upstream) = antigravity_upstream().await;
    let dir = TempDir::new().unwrap();
    let future = (Utc::now() + chrono::Duration::hours(2)).to_rfc3339();
    write_json(
        dir.path(),
        "antigravity-a@x.json",
        &json!({"email": "a@x", "access_token": "at-a", "expired": future, "project_id": "proj-a"}),
    );
    let revoked = json!({"email": "c@x", "access_token": "at-c", "refresh_token": "rt-revoked",
                         "expired": "2020-01-01T00:00:00Z"});
    let revoked_path = write_json(dir.path(), "antigravity-c@x.json", &revoked);

    let provider = Arc::new(Antigravity::new(local_client(), &overrides(&base)));
    let (url, _cache) = serve_cache(provider, dir.path()).await;
    let (status, body) = get_json(&format!("{url}/api/quota/antigravity")).await;

    assert_eq!(status, StatusCode::OK);
    let accounts = body["accounts"].as_array().unwrap();
    assert_eq!(accounts.len(), 2);
    assert!(accounts[0].get("error").is_none());
    assert_eq!(accounts[1]["email"], "c@x");
    let error = accounts[1]["error"].as_str().unwrap();
    assert!(error.contains("400"), "{error}");
    // The failed account's file is left untouched.
    let on_disk: Value = serde_json::from_slice(&std::fs::read(&revoked_path).unwrap()).unwrap();
    assert_eq!(on_disk, revoked);
}

async fn wham_usage(headers: HeaderMap) -> Response {
    let account = headers.get("chatgpt-account-id").and_then(|v| v.to_str().ok());
    match (bearer(&headers), account) {
        ("Bearer at-codex", Some("acct-1")) => Json(json!({
            "plan_type": "plus",
            "rate_limit": {
                "primary_window": {"used_percent": 25.0, "reset_after_seconds": 1800},
                "secondary_window": {"used_percent": 60.0, "reset_at": 1_893_456_000}
            }
        }))
        .into_response(),
        _ => StatusCode::FORBIDDEN.into_response(),
    }
}

#[tokio::test]
async fn test_codex_usage_windows() {
    let base = serve(Router::new().route("/backend-api/wham/usage", get(wham_usage))).await;
    let dir = TempDir::new().unwrap();
    let future = (Utc::now() + chrono::Duration::days(3)).to_rfc3339();
    write_json(
        dir.path(),
        "codex-d@x.json",
        &json!({"email": "d@x", "access_token": "at-codex", "account_id": "acct-1", "expired": future}),
    );

    let provider = Arc::new(Codex::new(local_client(), &overrides(&base)));
    let (url, _cache) = serve_cache(provider, dir.path()).await;
    let (status, body) = get_json(&format!("{url}/api/quota")).await;

    assert_eq!(status, StatusCode::OK);
    let codex = &body["providers"]["codex"];
    assert_eq!(codex["total"], 1);
    let account = &codex["accounts"][0];
    assert_eq!(account["planType"], "plus");
    let names: Vec<_> = account["resources"].as_array().unwrap().iter().map(|r| r["name"].clone()).collect();
    assert_eq!(names, vec![json!("five-hour"), json!("weekly")]);
    // The weekly window is the binding one.
    assert_eq!(account["groups"][0]["name"], "codex");
    assert_eq!(account["groups"][0]["remainingPercentage"], 40.0);
}
