//! Report whether the proxy is running and which versions are where.

use super::common::CommandContext;
use crate::service::{ServiceKind, port_in_use};
use crate::version::{ExecBinaryProbe, VersionSnapshot, VersionTracker};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub struct StatusCommand {
    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub root: PathBuf,
    pub running: bool,
    pub pid: Option<u32>,
    pub port: u16,
    pub port_in_use: bool,
    pub service: ServiceKind,
    pub autostart: bool,
    pub versions: VersionSnapshot,
}

impl StatusCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let cfg = ctx.install_config()?;
        let service = ctx.service(&cfg)?;
        let health = ctx.health()?;
        let tracker = VersionTracker::new(ctx.source(&cfg), Arc::new(ExecBinaryProbe), health);

        let pid = service.pid().await?;
        let report = StatusReport {
            root: cfg.root.clone(),
            running: pid.is_some(),
            pid,
            port: cfg.port,
            port_in_use: port_in_use(cfg.port),
            service: service.kind(),
            autostart: service.is_registered().await.unwrap_or(false),
            versions: tracker.snapshot(&cfg).await,
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }
        Ok(())
    }
}

fn print_report(report: &StatusReport) {
    let state = match report.pid {
        Some(pid) => format!("running (pid {pid})").green(),
        None => "stopped".red(),
    };
    println!("{:<12} {state}", "proxy:".bold());
    let port = if report.port_in_use {
        "in use".normal()
    } else {
        "free".dimmed()
    };
    println!("{:<12} {} ({port})", "port:".bold(), report.port);
    let autostart = if report.autostart {
        "registered"
    } else {
        "not registered"
    };
    println!("{:<12} {} (auto-start {autostart})", "service:".bold(), report.service);
    println!("{:<12} {}", "root:".bold(), report.root.display());

    let v = &report.versions;
    println!("{}", "versions:".bold());
    println!("  {:<10} {}", "source", v.source);
    println!("  {:<10} {}", "binary", v.binary);
    println!("  {:<10} {}", "running", v.running);
    println!("  {:<10} {}", "backup", v.backup);
    if report.running && v.binary.known().is_some() && !v.running.matches(&v.binary) {
        println!("  {}", "running version differs from installed binary; restart to apply".yellow());
    }
}
