use crate::write_json;
use chrono::Utc;
use proxyctl::quota::fetcher::QuotaFetcher;
use proxyctl::quota::watcher::CredentialWatcher;
use proxyctl::quota::{QuotaCache, QuotaProvider, ResourceQuota};
use proxyctl::test_utils::FakeQuotaProvider;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_new_credential_file_invalidates_fresh_snapshot() {
    let dir = TempDir::new().unwrap();
    let future = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
    write_json(dir.path(), "fake-a@x.json", &json!({"email": "a@x", "access_token": "t", "expired": future}));
    let provider = Arc::new(
        FakeQuotaProvider::new("fake")
            .with_account("a@x", vec![ResourceQuota::new("m", 50.0, None, "g")])
            .with_account("b@x", vec![ResourceQuota::new("m", 20.0, None, "g")]),
    );
    let providers: Vec<Arc<dyn QuotaProvider>> = vec![provider.clone()];
    let cache = Arc::new(QuotaCache::new(providers, QuotaFetcher::new(dir.path()), Duration::from_secs(3600)));

    assert_eq!(cache.get("fake", false).await.unwrap().accounts.len(), 1);
    let _watcher = CredentialWatcher::spawn(Arc::clone(&cache), Duration::from_millis(100)).unwrap();
    // Give the OS watch a moment to arm.
    tokio::time::sleep(Duration::from_millis(200)).await;

    write_json(dir.path(), "fake-b@x.json", &json!({"email": "b@x", "access_token": "t", "expired": future}));

    let mut accounts = 1;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        accounts = cache.get("fake", false).await.unwrap().accounts.len();
        if accounts == 2 {
            break;
        }
    }
    assert_eq!(accounts, 2, "snapshot was never invalidated");
    assert!(provider.call_count() >= 3);
}

#[tokio::test]
async fn test_unrelated_files_do_not_invalidate() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(FakeQuotaProvider::new("fake"));
    let providers: Vec<Arc<dyn QuotaProvider>> = vec![provider.clone()];
    let cache = Arc::new(QuotaCache::new(providers, QuotaFetcher::new(dir.path()), Duration::from_secs(3600)));
    let first = cache.get("fake", false).await.unwrap();

    let _watcher = CredentialWatcher::spawn(Arc::clone(&cache), Duration::from_millis(50)).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
    std::fs::write(dir.path().join("other-a@x.json"), "{}").unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(Arc::ptr_eq(&first, &cache.get("fake", false).await.unwrap()));
}
