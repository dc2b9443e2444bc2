//! Liveness of the running proxy over HTTP.
//!
//! The proxy has no dedicated health endpoint; any 2xx on `GET /` counts as
//! alive. The same request doubles as the source of the running version,
//! reported either in the `X-CPA-Version` header or a `version` JSON field.

use crate::constants::HEALTH_REQUEST_TIMEOUT;
use crate::core::ProxyctlError;
use crate::utils::{PollBudget, poll::poll_until_true};
use crate::version::VersionFact;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;

/// Response header carrying the proxy version.
pub const VERSION_HEADER: &str = "x-cpa-version";

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// One liveness request; `Ok` on a 2xx response.
    async fn check(&self, url: &str) -> Result<()>;

    /// Version reported by the instance answering at `url`.
    async fn running_version(&self, url: &str) -> VersionFact;
}

pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HEALTH_REQUEST_TIMEOUT)
            .no_proxy()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
        })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, url: &str) -> Result<()> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("{url} answered HTTP {status}");
        }
        Ok(())
    }

    async fn running_version(&self, url: &str) -> VersionFact {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return VersionFact::TimedOut,
            Err(e) => {
                tracing::debug!("running version unavailable: {e}");
                return VersionFact::Unreachable;
            }
        };

        if let Some(version) = response
            .headers()
            .get(VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return VersionFact::Known(version.to_string());
        }

        match response.json::<serde_json::Value>().await {
            Ok(body) => body
                .get("version")
                .and_then(serde_json::Value::as_str)
                .map_or(VersionFact::Absent, |v| VersionFact::Known(v.to_string())),
            Err(_) => VersionFact::Absent,
        }
    }
}

/// Poll `url` until it answers 2xx or `budget` runs out.
pub async fn wait_healthy(probe: &dyn HealthProbe, url: &str, budget: PollBudget) -> Result<()> {
    let healthy = poll_until_true(budget, || async {
        match probe.check(url).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("health probe: {e:#}");
                false
            }
        }
    })
    .await;

    if healthy {
        Ok(())
    } else {
        Err(ProxyctlError::HealthCheckFailed {
            url: url.to_string(),
            attempts: budget.attempts,
        }
        .into())
    }
}
