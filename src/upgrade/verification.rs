//! SHA-256 checksums of deployed binaries.
//!
//! Used to confirm a deploy moved the staged build intact, and reported by
//! `diagnose` for the active and backup slots.

use anyhow::{Context, Result, bail};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;
use tracing::debug;

pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// `sha256:<hex>` of the file at `path`.
    pub async fn compute_sha256(path: &Path) -> Result<String> {
        debug!("computing SHA256 of {}", path.display());
        let contents =
            fs::read(path).await.with_context(|| format!("Failed to read file: {}", path.display()))?;
        let digest = Sha256::digest(&contents);
        Ok(format!("sha256:{}", hex::encode(digest)))
    }

    /// Checksum of `path`, or `None` when there is no such file.
    pub async fn checksum_if_present(path: &Path) -> Result<Option<String>> {
        if !path.is_file() {
            return Ok(None);
        }
        Self::compute_sha256(path).await.map(Some)
    }

    pub async fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
        let actual = Self::compute_sha256(path).await?;
        if !actual.eq_ignore_ascii_case(expected) {
            bail!(
                "Checksum mismatch for {}\n  Expected: {expected}\n  Actual:   {actual}",
                path.display()
            );
        }
        Ok(())
    }
}
