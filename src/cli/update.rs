//! Pull, rebuild and redeploy the proxy with automatic rollback.

use super::common::{CommandContext, print_success, spinner};
use crate::upgrade::{UpdateOptions, UpdateOutcome, UpdateState};
use anyhow::Result;
use clap::Args;
use colored::Colorize;

/// Update the proxy to the tip of the configured branch.
///
/// When the new binary fails its health check the previous one is
/// restored and the command exits non-zero.
#[derive(Args, Debug, Default)]
pub struct UpdateCommand {
    /// Rebuild and redeploy even when already up to date
    #[arg(long)]
    force: bool,

    /// Fetch and report versions without changing anything
    #[arg(long, conflicts_with = "force")]
    dry_run: bool,
}

impl UpdateCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let cfg = ctx.install_config()?;
        let updater = ctx.updater(&cfg)?.with_progress(spinner("checking for updates..."));

        let mut states = Vec::new();
        let result = updater
            .run_recorded(
                UpdateOptions {
                    force: self.force,
                    dry_run: self.dry_run,
                },
                &mut states,
            )
            .await;
        tracing::debug!("update states: {states:?}");

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if states.contains(&UpdateState::RolledBack) {
                    eprintln!("{}", "Update failed; the previous binary was restored".yellow());
                }
                return Err(e);
            }
        };

        match outcome {
            UpdateOutcome::UpToDate {
                version,
            } => print_success(&format!("already up to date ({version})")),
            UpdateOutcome::Updated {
                from,
                to,
            } => print_success(&format!("updated {from} -> {to}")),
            UpdateOutcome::DryRun {
                snapshot,
                remote,
            } => {
                println!("{}", "Dry run, nothing changed".cyan());
                println!("  {:<10} {}", "source", snapshot.source);
                println!("  {:<10} {}", "binary", snapshot.binary);
                println!("  {:<10} {}", "running", snapshot.running);
                match remote {
                    Some(rev) if snapshot.binary.known() == Some(rev.version.as_str()) => {
                        println!("  {:<10} {} (up to date)", "remote", rev.version);
                    }
                    Some(rev) => {
                        println!("  {:<10} {} ({})", "remote", rev.version, "update available".green());
                    }
                    None => println!("  {:<10} unknown", "remote"),
                }
            }
        }
        Ok(())
    }
}
