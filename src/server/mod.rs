//! Local quota dashboard: JSON API plus an embedded single-page UI.
//!
//! | route | response |
//! |---|---|
//! | `GET /api/quota` | `{providers: {<name>: {accounts, total, lastUpdated}}}` |
//! | `GET /api/quota/{provider}` | `{accounts, total, lastUpdated}`, 404 for unknown providers |
//! | `GET /healthz` | `ok` |
//! | `GET /`, `GET /assets/*` | embedded UI |
//!
//! Both API routes accept `?refresh=true` to force a synchronous refresh.
//! The server binds to `127.0.0.1` only.

use crate::core::ProxyctlError;
use crate::quota::{AccountQuota, ProviderSnapshot, QuotaCache};
use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

const INDEX_HTML: &str = include_str!("assets/index.html");

/// `(file name, content type, body)`
const ASSETS: &[(&str, &str, &str)] = &[
    ("app.js", "text/javascript; charset=utf-8", include_str!("assets/app.js")),
    ("style.css", "text/css; charset=utf-8", include_str!("assets/style.css")),
];

const IMMUTABLE: &str = "public, max-age=31536000, immutable";

#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse<'a> {
    pub accounts: &'a [AccountQuota],
    pub total: usize,
    pub last_updated: DateTime<Utc>,
}

impl<'a> From<&'a ProviderSnapshot> for ProviderResponse<'a> {
    fn from(snapshot: &'a ProviderSnapshot) -> Self {
        Self {
            accounts: &snapshot.accounts,
            total: snapshot.accounts.len(),
            last_updated: snapshot.fetched_at,
        }
    }
}

/// JSON error body with a matching status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let status = match err.downcast_ref::<ProxyctlError>() {
            Some(ProxyctlError::UnknownProvider {
                ..
            }) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

pub fn router(cache: Arc<QuotaCache>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/assets/{*file}", get(asset))
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/quota", get(all_quota))
        .route("/api/quota/{provider}", get(provider_quota))
        .layer(CorsLayer::permissive())
        .with_state(cache)
}

/// Bind the dashboard port on the loopback interface.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    TcpListener::bind(addr).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            ProxyctlError::PortInUse {
                port,
            }
            .into()
        } else {
            anyhow::Error::new(e).context(format!("Failed to bind {addr}"))
        }
    })
}

/// Serve until ctrl-c.
pub async fn run(listener: TcpListener, cache: Arc<QuotaCache>) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("quota dashboard listening on http://{addr}");
    axum::serve(listener, router(cache))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Quota server failed")
}

async fn all_quota(
    State(cache): State<Arc<QuotaCache>>,
    Query(query): Query<RefreshQuery>,
) -> Result<Response, ApiError> {
    debug!("GET /api/quota refresh={}", query.refresh);
    let snapshots = cache.get_all(query.refresh).await?;
    let providers: BTreeMap<&str, ProviderResponse<'_>> =
        snapshots.iter().map(|(name, snapshot)| (*name, ProviderResponse::from(snapshot.as_ref()))).collect();
    Ok(Json(serde_json::json!({ "providers": providers })).into_response())
}

async fn provider_quota(
    State(cache): State<Arc<QuotaCache>>,
    Path(provider): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> Result<Response, ApiError> {
    debug!("GET /api/quota/{provider} refresh={}", query.refresh);
    let snapshot = cache.get(&provider, query.refresh).await?;
    Ok(Json(ProviderResponse::from(snapshot.as_ref())).into_response())
}

async fn index() -> Response {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8"), (header::CACHE_CONTROL, "no-cache")], INDEX_HTML)
        .into_response()
}

async fn asset(Path(file): Path<String>) -> Response {
    match ASSETS.iter().find(|(name, _, _)| *name == file) {
        Some((_, content_type, body)) => {
            ([(header::CONTENT_TYPE, *content_type), (header::CACHE_CONTROL, IMMUTABLE)], *body).into_response()
        }
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::fetcher::QuotaFetcher;
    use crate::quota::{QuotaProvider, ResourceQuota};
    use crate::test_utils::fakes::FakeQuotaProvider;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn start() -> (TempDir, Arc<FakeQuotaProvider>, String) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("fake-a@x.json"), r#"{"access_token":"t"}"#).unwrap();
        let fake = Arc::new(
            FakeQuotaProvider::new("fake").with_account("a@x", vec![ResourceQuota::new("m", 42.0, None, "g")]),
        );
        let providers: Vec<Arc<dyn QuotaProvider>> = vec![fake.clone()];
        let cache = Arc::new(QuotaCache::new(providers, QuotaFetcher::new(dir.path()), Duration::from_secs(60)));

        let listener = bind(0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(cache)).await });
        (dir, fake, format!("http://{addr}"))
    }

    async fn get(url: String) -> reqwest::Response {
        reqwest::Client::builder().no_proxy().build().unwrap().get(url).send().await.unwrap()
    }

    #[tokio::test]
    async fn test_provider_endpoint() {
        let (_dir, fake, base) = start().await;
        let body: serde_json::Value =
            get(format!("{base}/api/quota/fake")).await.json().await.unwrap();
        assert_eq!(body["total"], 1);
        assert_eq!(body["accounts"][0]["email"], "a@x");
        assert_eq!(body["accounts"][0]["groups"][0]["remainingPercentage"], 42.0);
        assert!(body["lastUpdated"].is_string());

        get(format!("{base}/api/quota/fake")).await;
        assert_eq!(fake.call_count(), 1);
        get(format!("{base}/api/quota/fake?refresh=true")).await;
        assert_eq!(fake.call_count(), 2);
    }

    #[tokio::test]
    async fn test_all_providers_endpoint() {
        let (_dir, _fake, base) = start().await;
        let body: serde_json::Value = get(format!("{base}/api/quota")).await.json().await.unwrap();
        assert_eq!(body["providers"]["fake"]["total"], 1);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_404_json() {
        let (_dir, _fake, base) = start().await;
        let response = get(format!("{base}/api/quota/nope")).await;
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_static_assets_and_cache_headers() {
        let (_dir, _fake, base) = start().await;
        let index = get(format!("{base}/")).await;
        assert_eq!(index.headers()["cache-control"], "no-cache");
        assert!(index.text().await.unwrap().contains("/assets/app.js"));

        let script = get(format!("{base}/assets/app.js")).await;
        assert_eq!(script.headers()["cache-control"], IMMUTABLE);

        let missing = get(format!("{base}/assets/nope.js")).await;
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        let health = get(format!("{base}/healthz")).await;
        assert_eq!(health.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let (_dir, _fake, base) = start().await;
        let response = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap()
            .get(format!("{base}/api/quota/fake"))
            .header("Origin", "http://example.test")
            .send()
            .await
            .unwrap();
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }
}
