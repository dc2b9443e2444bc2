//! Concurrent quota collection for one provider.

use super::credentials::Credential;
use super::{AccountQuota, ProviderSnapshot, QuotaProvider};
use crate::constants::QUOTA_BATCH_TIMEOUT;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Which credential files a snapshot was built from, and when they were listed.
#[derive(Debug, Clone)]
pub struct CredentialListing {
    pub listed_at: DateTime<Utc>,
    pub files: Vec<PathBuf>,
}

impl CredentialListing {
    /// Whether `path` may differ from what the snapshot saw: not listed,
    /// removed, or modified since the listing.
    #[must_use]
    pub fn is_outdated(&self, path: &Path) -> bool {
        if !self.files.iter().any(|f| f == path) {
            return true;
        }
        match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => DateTime::<Utc>::from(modified) >= self.listed_at,
            Err(_) => true,
        }
    }
}

/// Reads a provider's credential files and fetches every account at once.
#[derive(Debug, Clone)]
pub struct QuotaFetcher {
    auth_dir: PathBuf,
    batch_timeout: Duration,
}

impl QuotaFetcher {
    pub fn new(auth_dir: impl Into<PathBuf>) -> Self {
        Self {
            auth_dir: auth_dir.into(),
            batch_timeout: QUOTA_BATCH_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn auth_dir(&self) -> &Path {
        &self.auth_dir
    }

    /// `<auth_dir>/<provider>-*.json`, sorted. A missing directory has no files.
    pub fn credential_files(&self, provider: &dyn QuotaProvider) -> Result<Vec<PathBuf>> {
        if !self.auth_dir.is_dir() {
            return Ok(Vec::new());
        }
        let pattern = format!(
            "{}/{}-*.json",
            glob::Pattern::escape(&self.auth_dir.to_string_lossy()),
            provider.name()
        );
        let mut files: Vec<PathBuf> = glob::glob(&pattern)
            .with_context(|| format!("Invalid credential pattern: {pattern}"))?
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("skipping unreadable credential entry: {e}");
                    None
                }
            })
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Fetch all accounts of `provider`. Per-account failures are recorded on
    /// the account; tasks still running at the batch timeout are aborted and
    /// recorded as timed out.
    pub async fn fetch_provider(&self, provider: Arc<dyn QuotaProvider>) -> Result<ProviderSnapshot> {
        self.fetch_listed(provider).await.map(|(snapshot, _)| snapshot)
    }

    /// [`QuotaFetcher::fetch_provider`] plus the listing it was built from.
    pub async fn fetch_listed(
        &self,
        provider: Arc<dyn QuotaProvider>,
    ) -> Result<(ProviderSnapshot, CredentialListing)> {
        let listed_at = Utc::now();
        let files = self.credential_files(provider.as_ref())?;
        let listing = CredentialListing {
            listed_at,
            files: files.clone(),
        };
        debug!("{}: {} credential file(s)", provider.name(), files.len());

        let hints: Vec<String> = files.iter().map(|f| email_hint(provider.name(), f)).collect();
        let mut slots: Vec<Option<AccountQuota>> = vec![None; files.len()];
        let mut tasks = JoinSet::new();
        for (index, path) in files.into_iter().enumerate() {
            let provider = Arc::clone(&provider);
            tasks.spawn(async move { (index, fetch_account(provider.as_ref(), &path).await) });
        }

        let deadline = tokio::time::Instant::now() + self.batch_timeout;
        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((index, account)))) => slots[index] = Some(account),
                Ok(Some(Err(e))) => warn!("{}: quota task failed: {e}", provider.name()),
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    tasks.abort_all();
                    break;
                }
            }
        }

        let mut accounts: Vec<AccountQuota> = slots
            .into_iter()
            .zip(hints)
            .map(|(slot, hint)| {
                slot.unwrap_or_else(|| {
                    if timed_out {
                        AccountQuota::failed(hint, format!("timed out after {}s", self.batch_timeout.as_secs()))
                    } else {
                        AccountQuota::failed(hint, "quota task failed")
                    }
                })
            })
            .collect();
        accounts.sort_by(|a, b| a.email.cmp(&b.email));

        let snapshot = ProviderSnapshot {
            provider: provider.name().to_string(),
            accounts,
            fetched_at: Utc::now(),
        };
        Ok((snapshot, listing))
    }
}

/// Email shown for an account whose file could not be used.
fn email_hint(provider: &str, path: &Path) -> String {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    stem.strip_prefix(&format!("{provider}-")).map(str::to_string).unwrap_or(stem)
}

async fn fetch_account(provider: &dyn QuotaProvider, path: &Path) -> AccountQuota {
    let hint = email_hint(provider.name(), path);
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => return AccountQuota::failed(hint, format!("cannot read {}: {e}", path.display())),
    };
    let mut credential = match Credential::parse(path, &content) {
        Ok(credential) => credential,
        Err(e) => return AccountQuota::failed(hint, e.to_string()),
    };
    if credential.email.is_empty() {
        credential.email = hint;
    }

    if credential.needs_refresh(Utc::now()) && credential.refresh_token().is_some() {
        if let Err(e) = provider.refresh_token(&mut credential).await {
            return AccountQuota::failed(credential.email.clone(), format!("{e:#}"));
        }
        if let Err(e) = credential.persist() {
            warn!("could not save refreshed token for {}: {e:#}", credential.email);
        }
    }

    match provider.fetch(&credential).await {
        Ok(mut account) => {
            account.email.clone_from(&credential.email);
            account
        }
        Err(e) => AccountQuota::failed(credential.email.clone(), format!("{e:#}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::ResourceQuota;
    use crate::test_utils::fakes::FakeQuotaProvider;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, value: &serde_json::Value) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, value.to_string()).unwrap();
        path
    }

    fn provider() -> FakeQuotaProvider {
        FakeQuotaProvider::new("fake")
            .with_account("a@x", vec![ResourceQuota::new("m1", 80.0, None, "g")])
            .with_account("b@x", vec![ResourceQuota::new("m1", 20.0, None, "g")])
    }

    #[tokio::test]
    async fn test_only_provider_files_are_read() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "fake-b@x.json", &json!({"access_token": "t"}));
        write(dir.path(), "fake-a@x.json", &json!({"access_token": "t"}));
        write(dir.path(), "other-c@x.json", &json!({"access_token": "t"}));
        write(dir.path(), "fake-notes.txt", &json!({}));

        let fetcher = QuotaFetcher::new(dir.path());
        let files = fetcher.credential_files(&provider()).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.file_name().unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["fake-a@x.json", "fake-b@x.json"]);
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_only_that_account() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "fake-a@x.json", &json!({"access_token": "t", "email": "a@x"}));
        std::fs::write(dir.path().join("fake-b@x.json"), "{oops").unwrap();

        let snapshot = QuotaFetcher::new(dir.path()).fetch_provider(Arc::new(provider())).await.unwrap();
        assert_eq!(snapshot.accounts.len(), 2);
        assert_eq!(snapshot.accounts[0].email, "a@x");
        assert!(snapshot.accounts[0].error.is_none());
        assert_eq!(snapshot.accounts[0].groups[0].remaining_percentage, 80.0);
        assert_eq!(snapshot.accounts[1].email, "b@x");
        assert!(snapshot.accounts[1].error.is_some());
        assert!(snapshot.accounts[1].resources.is_empty());
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_saved() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "fake-a@x.json",
            &json!({"access_token": "old", "refresh_token": "r", "expired": "2020-01-01T00:00:00Z", "extra": 1}),
        );

        let snapshot = QuotaFetcher::new(dir.path()).fetch_provider(Arc::new(provider())).await.unwrap();
        assert!(snapshot.accounts[0].error.is_none());

        let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["access_token"], "refreshed-token");
        assert_eq!(saved["extra"], 1);
        let expiry = chrono::DateTime::parse_from_rfc3339(saved["expired"].as_str().unwrap()).unwrap();
        assert!(expiry > Utc::now());
    }

    #[tokio::test]
    async fn test_slow_accounts_time_out() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "fake-a@x.json", &json!({"access_token": "t"}));
        let slow = provider().with_delay(Duration::from_secs(5));

        let snapshot = QuotaFetcher::new(dir.path())
            .with_batch_timeout(Duration::from_millis(50))
            .fetch_provider(Arc::new(slow))
            .await
            .unwrap();
        assert_eq!(snapshot.accounts[0].email, "a@x");
        assert!(snapshot.accounts[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_listing_flags_unlisted_and_rewritten_files() {
        let dir = TempDir::new().unwrap();
        let listed = write(dir.path(), "fake-a@x.json", &json!({"access_token": "t"}));
        let (_, listing) = QuotaFetcher::new(dir.path()).fetch_listed(Arc::new(provider())).await.unwrap();
        assert_eq!(listing.files, vec![listed.clone()]);
        assert!(!listing.is_outdated(&listed));

        let unlisted = write(dir.path(), "fake-b@x.json", &json!({"access_token": "t"}));
        assert!(listing.is_outdated(&unlisted));

        std::fs::remove_file(&listed).unwrap();
        assert!(listing.is_outdated(&listed));
    }

    #[tokio::test]
    async fn test_missing_auth_dir_is_empty() {
        let snapshot = QuotaFetcher::new("/nonexistent/auth").fetch_provider(Arc::new(provider())).await.unwrap();
        assert!(snapshot.accounts.is_empty());
    }
}
