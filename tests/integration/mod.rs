//! Integration tests for proxyctl.
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! - **update_workflow**: install, update, automatic and manual rollback
//! - **quota_end_to_end**: provider adapters against a mock upstream, served over HTTP
//! - **quota_cache**: concurrency, partial failure and group aggregation
//! - **credential_watcher**: invalidation from real file system events
//! - **cli**: the binary's argument handling and local-only commands

mod cli;
mod credential_watcher;
mod quota_cache;
mod quota_end_to_end;
mod update_workflow;

use axum::Router;
use std::path::{Path, PathBuf};

/// Serve `router` on an ephemeral loopback port, returning its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await });
    format!("http://{addr}")
}

/// HTTP client that ignores proxy environment variables.
pub fn local_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

pub fn write_json(dir: &Path, name: &str, value: &serde_json::Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
    path
}
