//! Cache invalidation on credential file changes.
//!
//! Events from the auth directory are collected until the directory has been
//! quiet for the debounce period, then handed to
//! [`QuotaCache::invalidate_for_paths`] in one batch.

use super::QuotaCache;
use crate::utils::ensure_dir;
use anyhow::{Context, Result};
use notify::event::EventKind;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Running watcher; stops when dropped.
pub struct CredentialWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for CredentialWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl CredentialWatcher {
    /// Watch `cache`'s auth directory, creating it if missing so accounts
    /// logged in later are still seen. Must be called inside a tokio runtime.
    pub fn spawn(cache: Arc<QuotaCache>, debounce: Duration) -> Result<Self> {
        let dir = cache.auth_dir().to_path_buf();
        ensure_dir(&dir)?;
        let (tx, rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
                    let _ = tx.send(event.paths);
                }
            }
            Err(e) => warn!("credential watcher error: {e}"),
        })
        .context("Failed to create file watcher")?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;
        debug!("watching {} for credential changes", dir.display());

        let task = tokio::spawn(debounce_loop(cache, rx, debounce));
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

async fn debounce_loop(cache: Arc<QuotaCache>, mut rx: mpsc::UnboundedReceiver<Vec<PathBuf>>, debounce: Duration) {
    while let Some(first) = rx.recv().await {
        let mut pending: BTreeSet<PathBuf> = first.into_iter().collect();
        loop {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(Some(paths)) => pending.extend(paths),
                Ok(None) | Err(_) => break,
            }
        }
        let paths: Vec<PathBuf> = pending.into_iter().collect();
        let invalidated = cache.invalidate_for_paths(&paths).await;
        if !invalidated.is_empty() {
            debug!("invalidated quota cache for {}", invalidated.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::fetcher::QuotaFetcher;
    use crate::quota::{QuotaProvider, ResourceQuota};
    use crate::test_utils::fakes::FakeQuotaProvider;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_auth_dir_is_created() {
        let dir = TempDir::new().unwrap();
        let auth_dir = dir.path().join("auth");
        let provider: Arc<dyn QuotaProvider> = Arc::new(FakeQuotaProvider::new("fake"));
        let cache = Arc::new(QuotaCache::new(vec![provider], QuotaFetcher::new(&auth_dir), Duration::from_secs(600)));

        let _watcher = CredentialWatcher::spawn(cache, Duration::from_millis(20)).unwrap();
        assert!(auth_dir.is_dir());
    }

    #[tokio::test]
    async fn test_debounced_batch_invalidates_owner() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("fake-a@x.json"), r#"{"access_token":"t"}"#).unwrap();
        let provider: Arc<dyn QuotaProvider> =
            Arc::new(FakeQuotaProvider::new("fake").with_account("a@x", vec![ResourceQuota::new("m", 1.0, None, "g")]));
        let cache = Arc::new(QuotaCache::new(vec![provider], QuotaFetcher::new(dir.path()), Duration::from_secs(600)));
        let first = cache.get("fake", false).await.unwrap();

        // drive the loop directly; the OS watcher is exercised in integration tests
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(debounce_loop(Arc::clone(&cache), rx, Duration::from_millis(20)));
        let added = dir.path().join("fake-b@x.json");
        std::fs::write(&added, r#"{"access_token":"t"}"#).unwrap();
        tx.send(vec![added.clone()]).unwrap();
        tx.send(vec![added]).unwrap();
        drop(tx);
        task.await.unwrap();

        let second = cache.get("fake", false).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.accounts.len(), 2);
    }
}
