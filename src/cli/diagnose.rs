//! Collect everything useful for troubleshooting an installation.

use super::common::CommandContext;
use crate::config::InstallConfig;
use crate::quota::builtin_providers;
use crate::quota::fetcher::QuotaFetcher;
use crate::service::port_in_use;
use crate::upgrade::verification::ChecksumVerifier;
use crate::utils::platform::find_command;
use crate::version::{ExecBinaryProbe, VersionTracker};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub struct DiagnoseCommand {}

impl DiagnoseCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        section("tools");
        for tool in ["git", "go"] {
            match find_command(tool) {
                Some(path) => ok(tool, &path.display().to_string()),
                None => bad(tool, "not found on PATH"),
            }
        }

        section("installation");
        match ctx.install_config() {
            Ok(cfg) => self.installation(ctx, &cfg).await?,
            Err(e) => {
                bad("root", &format!("{e:#}"));
                println!("  searched: {}", display_list(&ctx.resolver.candidates()));
            }
        }

        section("credentials");
        match ctx.resolver.auth_dir() {
            Ok(dir) => {
                path_line("auth dir", &dir);
                let fetcher = QuotaFetcher::new(&dir);
                for provider in builtin_providers(&ctx.resolver.settings.quota)? {
                    let files = fetcher.credential_files(provider.as_ref())?;
                    let count = files.len();
                    let detail = format!("{count} credential file{}", if count == 1 { "" } else { "s" });
                    if count == 0 {
                        skip(provider.name(), &detail);
                    } else {
                        ok(provider.name(), &detail);
                    }
                }
            }
            Err(e) => bad("auth dir", &format!("{e:#}")),
        }
        Ok(())
    }

    async fn installation(&self, ctx: &CommandContext, cfg: &InstallConfig) -> Result<()> {
        path_line("root", &cfg.root);
        path_line("source", &cfg.source_dir);
        path_line("binary", &cfg.binary_path);
        path_line("config", &cfg.config_file);
        path_line(".env", &cfg.dotenv_file);
        path_line("log", &cfg.log_file);
        if cfg.uses_placeholder_key() {
            bad("api key", "placeholder key in use; reinstall or edit .env");
        }

        section("service");
        let service = ctx.service(cfg)?;
        ok("kind", service.kind().as_str());
        match service.is_registered().await {
            Ok(true) => {
                let unit = service.unit_path().map(|p| p.display().to_string()).unwrap_or_default();
                ok("auto-start", &format!("registered {unit}"));
            }
            Ok(false) => skip("auto-start", "not registered"),
            Err(e) => bad("auto-start", &format!("{e:#}")),
        }
        match service.pid().await {
            Ok(Some(pid)) => ok("process", &format!("pid {pid}")),
            Ok(None) => skip("process", "not running"),
            Err(e) => bad("process", &format!("{e:#}")),
        }
        let port = if port_in_use(cfg.port) {
            "in use"
        } else {
            "free"
        };
        ok("port", &format!("{} ({port})", cfg.port));

        section("versions");
        let tracker = VersionTracker::new(ctx.source(cfg), Arc::new(ExecBinaryProbe), ctx.health()?);
        let snapshot = tracker.snapshot(cfg).await;
        for (label, fact) in [
            ("source", &snapshot.source),
            ("binary", &snapshot.binary),
            ("running", &snapshot.running),
            ("backup", &snapshot.backup),
        ] {
            match fact.known() {
                Some(version) => ok(label, version),
                None => skip(label, &fact.to_string()),
            }
        }

        section("checksums");
        for (label, path) in [("binary", cfg.binary_path.clone()), ("backup", cfg.backup_path())] {
            match ChecksumVerifier::checksum_if_present(&path).await {
                Ok(Some(sum)) => ok(label, &sum),
                Ok(None) => skip(label, "absent"),
                Err(e) => bad(label, &format!("{e:#}")),
            }
        }
        if cfg.failed_path().exists() {
            bad("failed build", &cfg.failed_path().display().to_string());
        }
        Ok(())
    }
}

fn section(title: &str) {
    println!("\n{}", title.bold().underline());
}

fn ok(label: &str, detail: &str) {
    println!("  {} {label:<14} {detail}", "✓".green());
}

fn skip(label: &str, detail: &str) {
    println!("  {} {label:<14} {}", "-".dimmed(), detail.dimmed());
}

fn bad(label: &str, detail: &str) {
    println!("  {} {label:<14} {}", "✗".red(), detail.red());
}

fn path_line(label: &str, path: &Path) {
    if path.exists() {
        ok(label, &path.display().to_string());
    } else {
        bad(label, &format!("{} (missing)", path.display()));
    }
}

fn display_list(paths: &[std::path::PathBuf]) -> String {
    paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
}
