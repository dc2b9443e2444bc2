//! `start`, `stop` and `restart`.

use super::common::{CommandContext, print_success, spinner};
use crate::service::wait_healthy;
use anyhow::Result;
use clap::Args;

#[derive(Args, Debug, Default)]
pub struct StartCommand {}

impl StartCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let cfg = ctx.install_config()?;
        let service = ctx.service(&cfg)?;
        if let Some(pid) = service.pid().await? {
            print_success(&format!("proxy already running (pid {pid})"));
            return Ok(());
        }

        let progress = spinner("starting proxy...");
        service.start().await?;
        progress.set_message("waiting for health check...");
        let result = wait_healthy(ctx.health()?.as_ref(), &cfg.health_url(), cfg.health_budget).await;
        progress.finish_and_clear();
        result?;

        print_success(&format!("proxy started on port {} via {}", cfg.port, service.kind()));
        Ok(())
    }
}

#[derive(Args, Debug, Default)]
pub struct StopCommand {}

impl StopCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let cfg = ctx.install_config()?;
        let service = ctx.service(&cfg)?;
        if !service.is_running().await? {
            print_success("proxy is not running");
            return Ok(());
        }
        service.stop().await?;
        print_success("proxy stopped");
        Ok(())
    }
}

#[derive(Args, Debug, Default)]
pub struct RestartCommand {}

impl RestartCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let cfg = ctx.install_config()?;
        let service = ctx.service(&cfg)?;

        let progress = spinner("restarting proxy...");
        let result = async {
            service.restart().await?;
            progress.set_message("waiting for health check...");
            wait_healthy(ctx.health()?.as_ref(), &cfg.health_url(), cfg.health_budget).await
        }
        .await;
        progress.finish_and_clear();
        result?;

        let pid = service.pid().await?.map_or_else(|| "unknown".to_string(), |p| p.to_string());
        print_success(&format!("proxy restarted (pid {pid})"));
        Ok(())
    }
}
