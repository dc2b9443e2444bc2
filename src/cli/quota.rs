//! Show remaining quota across provider accounts.

use super::common::{CommandContext, print_success, print_warning, spinner};
use crate::constants::WATCH_DEBOUNCE;
use crate::quota::watcher::CredentialWatcher;
use crate::quota::{AccountQuota, ProviderSnapshot};
use crate::server::{self, ProviderResponse};
use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use clap::Args;
use colored::{ColoredString, Colorize};
use std::collections::BTreeMap;
use std::sync::Arc;

const BAR_WIDTH: usize = 10;

#[derive(Args, Debug, Default)]
pub struct QuotaCommand {
    /// Only this provider (antigravity, codex, gemini)
    #[arg(short, long)]
    provider: Option<String>,

    /// Print machine-readable JSON
    #[arg(long, conflicts_with = "web")]
    json: bool,

    /// Fetch from the providers even if a cached snapshot is still fresh
    #[arg(long, conflicts_with = "web")]
    refresh: bool,

    /// Serve the quota dashboard instead of printing once
    #[arg(long)]
    web: bool,

    /// Dashboard port (defaults to the configured quota port)
    #[arg(long, requires = "web")]
    port: Option<u16>,
}

impl QuotaCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let cache = ctx.quota_cache()?;

        if self.web {
            let port = self.port.unwrap_or(ctx.resolver.settings.quota.web_port);
            let listener = server::bind(port).await?;
            // Keep the watcher alive for the lifetime of the server.
            let _watcher = match CredentialWatcher::spawn(Arc::clone(&cache), WATCH_DEBOUNCE) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    print_warning(&format!("credential changes will not be picked up: {e:#}"));
                    None
                }
            };
            print_success(&format!("quota dashboard at http://{}", listener.local_addr()?));
            println!("Press Ctrl-C to stop");
            return server::run(listener, cache).await;
        }

        let progress = spinner("fetching quota...");
        let snapshots: Result<BTreeMap<String, Arc<ProviderSnapshot>>> = match &self.provider {
            Some(name) => {
                let result = cache.get(name, self.refresh).await;
                result.map(|snapshot| BTreeMap::from([(snapshot.provider.clone(), snapshot)]))
            }
            None => cache
                .get_all(self.refresh)
                .await
                .map(|all| all.into_iter().map(|(name, snapshot)| (name.to_string(), snapshot)).collect()),
        };
        progress.finish_and_clear();
        let snapshots = snapshots?;

        if self.json {
            let responses: BTreeMap<&str, ProviderResponse<'_>> =
                snapshots.iter().map(|(name, s)| (name.as_str(), ProviderResponse::from(s.as_ref()))).collect();
            let json = match responses.values().next() {
                Some(only) if self.provider.is_some() => serde_json::to_string_pretty(only)?,
                _ => serde_json::to_string_pretty(&serde_json::json!({ "providers": responses }))?,
            };
            println!("{json}");
            return Ok(());
        }

        let now = Utc::now();
        for snapshot in snapshots.values() {
            print_snapshot(snapshot, now);
        }
        Ok(())
    }
}

fn print_snapshot(snapshot: &ProviderSnapshot, now: DateTime<Utc>) {
    let count = snapshot.accounts.len();
    println!(
        "{} {}",
        snapshot.provider.bold(),
        format!(
            "{count} account{} · updated {}",
            if count == 1 { "" } else { "s" },
            snapshot.fetched_at.with_timezone(&Local).format("%H:%M:%S")
        )
        .dimmed()
    );
    if count == 0 {
        println!("  {}", "no credential files found".dimmed());
    }
    for account in &snapshot.accounts {
        print_account(account, now);
    }
    println!();
}

fn print_account(account: &AccountQuota, now: DateTime<Utc>) {
    match &account.plan_type {
        Some(plan) => println!("  {} ({plan})", account.email),
        None => println!("  {}", account.email),
    }
    if let Some(error) = &account.error {
        println!("    {}", error.red());
        return;
    }
    for group in &account.groups {
        let reset = group.reset_time.map(|t| format!("resets {}", format_reset(t, now))).unwrap_or_default();
        println!(
            "    {:<14} {} {:>4.0}%  {}",
            group.name,
            bar(group.remaining_percentage),
            group.remaining_percentage,
            reset.dimmed()
        );
    }
}

fn bar(percentage: f64) -> ColoredString {
    let filled = ((percentage / 100.0) * BAR_WIDTH as f64).round().clamp(0.0, BAR_WIDTH as f64) as usize;
    let text = format!("{}{}", "█".repeat(filled), "░".repeat(BAR_WIDTH - filled));
    if percentage <= 0.0 {
        text.red()
    } else if percentage < 20.0 {
        text.yellow()
    } else {
        text.green()
    }
}

/// Relative reset time: `now`, `in 45m`, `in 3h 5m`, `in 2d 4h`.
pub fn format_reset(reset: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (reset - now).num_seconds();
    if secs <= 0 {
        return "now".to_string();
    }
    let minutes = (secs + 59) / 60;
    let (days, hours, mins) = (minutes / 1440, (minutes % 1440) / 60, minutes % 60);
    if days > 0 {
        format!("in {days}d {hours}h")
    } else if hours > 0 {
        format!("in {hours}h {mins}m")
    } else {
        format!("in {mins}m")
    }
}
