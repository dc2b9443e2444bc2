//! Restore the binary kept by the last update.

use super::common::{CommandContext, print_success, spinner};
use crate::version::{BinaryProbe, ExecBinaryProbe};
use anyhow::Result;
use clap::Args;
use colored::Colorize;

#[derive(Args, Debug, Default)]
pub struct RollbackCommand {}

impl RollbackCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let cfg = ctx.install_config()?;
        let manager = ctx.updater(&cfg)?.rollback_manager();
        if !manager.backup_exists() {
            // Reports the missing backup without touching anything.
            return manager.rollback().await;
        }
        let previous = ExecBinaryProbe.probe(&cfg.backup_path()).await;

        println!("{}", "Rolling back to previous version...".yellow());
        let progress = spinner("restoring backup...");
        let result = manager.rollback().await;
        progress.finish_and_clear();
        result?;

        print_success(&format!("rolled back to {previous}"));
        Ok(())
    }
}
