//! Per-provider snapshot cache.
//!
//! Read policy:
//!
//! - **fresh** (younger than the TTL): served from memory
//! - **stale**: served from memory while one background refresh runs
//! - **missing**: fetched synchronously; concurrent callers wait for the
//!   same fetch
//! - **forced**: fetched synchronously regardless of the entry, result stored
//!
//! Each provider has one refresh lock, so at most one fetch per provider is
//! in flight no matter how many readers arrive.

use super::fetcher::{CredentialListing, QuotaFetcher};
use super::{ProviderSnapshot, QuotaProvider};
use crate::core::ProxyctlError;
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

struct Entry {
    snapshot: Arc<ProviderSnapshot>,
    listing: CredentialListing,
    stored: Instant,
}

pub struct QuotaCache {
    providers: BTreeMap<&'static str, Arc<dyn QuotaProvider>>,
    refresh_locks: HashMap<&'static str, Arc<Mutex<()>>>,
    entries: RwLock<HashMap<&'static str, Entry>>,
    fetcher: QuotaFetcher,
    ttl: Duration,
}

impl QuotaCache {
    pub fn new(providers: Vec<Arc<dyn QuotaProvider>>, fetcher: QuotaFetcher, ttl: Duration) -> Self {
        let providers: BTreeMap<_, _> = providers.into_iter().map(|p| (p.name(), p)).collect();
        let refresh_locks = providers.keys().map(|name| (*name, Arc::new(Mutex::new(())))).collect();
        Self {
            providers,
            refresh_locks,
            entries: RwLock::new(HashMap::new()),
            fetcher,
            ttl,
        }
    }

    /// Provider names in display order.
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.keys().copied().collect()
    }

    pub fn auth_dir(&self) -> &Path {
        self.fetcher.auth_dir()
    }

    fn provider(&self, name: &str) -> Result<(&'static str, Arc<dyn QuotaProvider>)> {
        self.providers
            .get_key_value(name)
            .map(|(key, provider)| (*key, Arc::clone(provider)))
            .ok_or_else(|| {
                ProxyctlError::UnknownProvider {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Cached snapshot and whether it is still fresh.
    async fn lookup(&self, name: &str) -> Option<(Arc<ProviderSnapshot>, bool)> {
        let entries = self.entries.read().await;
        entries.get(name).map(|entry| (Arc::clone(&entry.snapshot), entry.stored.elapsed() < self.ttl))
    }

    /// Snapshot for `name` following the read policy above.
    pub async fn get(self: &Arc<Self>, name: &str, force: bool) -> Result<Arc<ProviderSnapshot>> {
        let (key, provider) = self.provider(name)?;

        if !force && let Some((snapshot, fresh)) = self.lookup(key).await {
            if !fresh {
                self.revalidate(key, provider);
            }
            return Ok(snapshot);
        }

        let lock = Arc::clone(&self.refresh_locks[key]);
        let _guard = lock.lock().await;
        if !force && let Some((snapshot, _)) = self.lookup(key).await {
            // filled by the fetch we waited on
            return Ok(snapshot);
        }
        self.refresh(key, provider).await
    }

    /// Snapshots of every provider, fetched concurrently.
    pub async fn get_all(self: &Arc<Self>, force: bool) -> Result<BTreeMap<&'static str, Arc<ProviderSnapshot>>> {
        let names = self.provider_names();
        let snapshots = futures::future::try_join_all(names.iter().map(|name| self.get(name, force))).await?;
        Ok(names.into_iter().zip(snapshots).collect())
    }

    async fn refresh(&self, key: &'static str, provider: Arc<dyn QuotaProvider>) -> Result<Arc<ProviderSnapshot>> {
        let (snapshot, listing) = self.fetcher.fetch_listed(provider).await?;
        let snapshot = Arc::new(snapshot);
        debug!("{key}: cached {} account(s)", snapshot.accounts.len());
        self.entries.write().await.insert(
            key,
            Entry {
                snapshot: Arc::clone(&snapshot),
                listing,
                stored: Instant::now(),
            },
        );
        Ok(snapshot)
    }

    /// Start a background refresh unless one is already running.
    fn revalidate(self: &Arc<Self>, key: &'static str, provider: Arc<dyn QuotaProvider>) {
        let Ok(guard) = Arc::clone(&self.refresh_locks[key]).try_lock_owned() else {
            return;
        };
        debug!("{key}: stale, refreshing in background");
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = cache.refresh(key, provider).await {
                warn!("{key}: background quota refresh failed: {e:#}");
            }
        });
    }

    /// Wait for any in-flight refresh of `name` to finish.
    pub async fn settled(&self, name: &str) {
        if let Some(lock) = self.refresh_locks.get(name) {
            let _ = lock.lock().await;
        }
    }

    /// Drop the cached snapshot of `name`.
    pub async fn invalidate(&self, name: &str) -> bool {
        self.entries.write().await.remove(name).is_some()
    }

    /// Invalidate providers owning any of `paths` that the cached snapshot
    /// did not list, or that was removed or modified since the listing.
    /// Returns the providers invalidated.
    ///
    /// A token refresh rewrites its credential file during the fetch, so the
    /// next watcher batch costs one extra fetch for that provider.
    pub async fn invalidate_for_paths(&self, paths: &[PathBuf]) -> Vec<&'static str> {
        let mut invalidated = Vec::new();
        for (name, provider) in &self.providers {
            let changed = {
                let entries = self.entries.read().await;
                let Some(entry) = entries.get(name) else {
                    continue;
                };
                paths.iter().any(|path| {
                    let owned = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|file_name| provider.owns_file(file_name));
                    owned && entry.listing.is_outdated(path)
                })
            };
            if changed && self.invalidate(name).await {
                debug!("{name}: credential files changed, cache invalidated");
                invalidated.push(*name);
            }
        }
        invalidated
    }
}
