use crate::{local_client, serve, write_json};
use chrono::{TimeZone, Utc};
use futures::future::join_all;
use proxyctl::quota::fetcher::QuotaFetcher;
use proxyctl::quota::{QuotaCache, QuotaProvider, ResourceQuota};
use proxyctl::test_utils::FakeQuotaProvider;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn credential(dir: &Path, provider: &str, email: &str) {
    let future = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
    write_json(
        dir,
        &format!("{provider}-{email}.json"),
        &json!({"email": email, "access_token": format!("at-{email}"), "expired": future}),
    );
}

fn cache(providers: Vec<Arc<dyn QuotaProvider>>, dir: &Path, ttl: Duration) -> Arc<QuotaCache> {
    Arc::new(QuotaCache::new(providers, QuotaFetcher::new(dir), ttl))
}

#[tokio::test]
async fn test_accounts_are_fetched_concurrently() {
    let dir = TempDir::new().unwrap();
    let delay = Duration::from_millis(300);
    let mut provider = FakeQuotaProvider::new("fake").with_delay(delay);
    for i in 0..8 {
        let email = format!("user{i}@x");
        credential(dir.path(), "fake", &email);
        provider = provider.with_account(&email, vec![ResourceQuota::new("m", 50.0, None, "g")]);
    }
    let provider = Arc::new(provider);
    let cache = cache(vec![provider.clone()], dir.path(), Duration::from_secs(60));

    let started = Instant::now();
    let snapshot = cache.get("fake", false).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(snapshot.accounts.len(), 8);
    assert_eq!(provider.call_count(), 8);
    assert!(elapsed < delay * 3, "took {elapsed:?}");
}

#[tokio::test]
async fn test_partial_failure_keeps_healthy_accounts() {
    let dir = TempDir::new().unwrap();
    credential(dir.path(), "fake", "a@x");
    credential(dir.path(), "fake", "unknown@x");
    std::fs::write(dir.path().join("fake-broken@x.json"), "{ not json").unwrap();
    let provider = Arc::new(FakeQuotaProvider::new("fake").with_account("a@x", vec![ResourceQuota::new(
        "m",
        75.0,
        None,
        "g",
    )]));
    let cache = cache(vec![provider], dir.path(), Duration::from_secs(60));

    let snapshot = cache.get("fake", false).await.unwrap();
    let summary: Vec<(&str, bool)> =
        snapshot.accounts.iter().map(|a| (a.email.as_str(), a.error.is_some())).collect();
    assert_eq!(summary, vec![("a@x", false), ("broken@x", true), ("unknown@x", true)]);
    assert_eq!(snapshot.accounts[0].groups[0].remaining_percentage, 75.0);
    assert!(snapshot.accounts[2].error.as_deref().unwrap().contains("no quota for unknown@x"));
}

#[tokio::test]
async fn test_group_aggregation_through_the_fetch_path() {
    let dir = TempDir::new().unwrap();
    credential(dir.path(), "fake", "a@x");
    let early = Utc.with_ymd_and_hms(2030, 1, 1, 1, 0, 0).unwrap();
    let late = Utc.with_ymd_and_hms(2030, 1, 1, 9, 0, 0).unwrap();
    let provider = Arc::new(FakeQuotaProvider::new("fake").with_account("a@x", vec![
        ResourceQuota::new("full", 100.0, Some(late), "shared"),
        ResourceQuota::new("late", 40.0, Some(late), "shared"),
        ResourceQuota::new("early", 40.0, Some(early), "shared"),
        ResourceQuota::new("idle-a", 100.0, Some(early), "idle"),
        ResourceQuota::new("idle-b", 100.0, None, "idle"),
    ]));
    let cache = cache(vec![provider], dir.path(), Duration::from_secs(60));

    let snapshot = cache.get("fake", false).await.unwrap();
    let groups = &snapshot.accounts[0].groups;
    let shared = groups.iter().find(|g| g.name == "shared").unwrap();
    assert_eq!(shared.remaining_percentage, 40.0);
    assert_eq!(shared.reset_time, Some(early));
    assert_eq!(shared.members.len(), 3);
    let idle = groups.iter().find(|g| g.name == "idle").unwrap();
    assert_eq!(idle.remaining_percentage, 100.0);
    assert_eq!(idle.reset_time, None);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let dir = TempDir::new().unwrap();
    credential(dir.path(), "alpha", "a@x");
    credential(dir.path(), "beta", "b@x");
    let alpha = Arc::new(
        FakeQuotaProvider::new("alpha")
            .with_delay(Duration::from_millis(200))
            .with_account("a@x", vec![ResourceQuota::new("m", 10.0, None, "g")]),
    );
    let beta = Arc::new(FakeQuotaProvider::new("beta").with_account("b@x", vec![ResourceQuota::new(
        "m",
        90.0,
        None,
        "g",
    )]));
    let providers: Vec<Arc<dyn QuotaProvider>> = vec![alpha.clone(), beta.clone()];
    let cache = cache(providers, dir.path(), Duration::from_secs(60));
    let url = serve(proxyctl::server::router(cache)).await;

    let client = local_client();
    let responses = join_all((0..10).map(|_| {
        let client = client.clone();
        let url = format!("{url}/api/quota");
        async move { client.get(url).send().await.unwrap().json::<Value>().await.unwrap() }
    }))
    .await;

    assert!(responses.iter().all(|body| body["providers"]["alpha"]["total"] == 1));
    assert!(responses.iter().all(|body| body["providers"]["beta"]["accounts"][0]["email"] == "b@x"));
    assert_eq!(alpha.call_count(), 1);
    assert_eq!(beta.call_count(), 1);
}

#[tokio::test]
async fn test_stale_snapshot_is_served_while_refreshing() {
    let dir = TempDir::new().unwrap();
    credential(dir.path(), "fake", "a@x");
    let provider = Arc::new(
        FakeQuotaProvider::new("fake")
            .with_delay(Duration::from_millis(100))
            .with_account("a@x", vec![ResourceQuota::new("m", 60.0, None, "g")]),
    );
    let cache = cache(vec![provider.clone()], dir.path(), Duration::from_millis(50));

    let first = cache.get("fake", false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let started = Instant::now();
    let stale = cache.get("fake", false).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(Arc::ptr_eq(&first, &stale));

    cache.settled("fake").await;
    let refreshed = cache.get("fake", false).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &refreshed));
    assert_eq!(provider.call_count(), 2);
}
