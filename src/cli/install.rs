//! Install the proxy from source.

use super::common::{CommandContext, print_success, print_warning, spinner};
use crate::build::GoBuilder;
use crate::git::ensure_git_available;
use crate::installer::{InstallOptions, Installer};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::sync::Arc;

/// Clone, build and start the proxy under the installation root.
///
/// Safe to re-run: an installed binary that matches the source is not
/// rebuilt, and existing `config.yaml` and `.env` files are left alone.
#[derive(Args, Debug, Default)]
pub struct InstallCommand {
    /// Do not start the proxy afterwards
    #[arg(long)]
    no_start: bool,

    /// Do not register the OS auto-start unit
    #[arg(long)]
    no_autostart: bool,
}

impl InstallCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        ensure_git_available()?;
        let root = ctx.resolver.install_target()?;
        let cfg = ctx.resolver.resolve_at(root)?;
        println!("{} {}", "Installing into".cyan(), cfg.root.display());

        let installer = Installer::new(
            cfg.clone(),
            ctx.source(&cfg),
            Arc::new(GoBuilder::default()),
            ctx.service(&cfg)?,
            ctx.health()?,
        )
        .with_progress(spinner("preparing..."));

        let report = installer
            .run(InstallOptions {
                start: !self.no_start,
                autostart: !self.no_autostart,
            })
            .await?;

        if report.built {
            print_success(&format!("built {}", report.version));
        } else {
            print_success(&format!("{} already installed", report.version));
        }
        if report.wrote_config {
            println!("  wrote {}", cfg.config_file.display());
        }
        if report.wrote_dotenv {
            println!("  wrote {} (API key)", cfg.dotenv_file.display());
        }
        if let Some(warning) = &report.autostart_warning {
            print_warning(&format!("auto-start not registered: {warning}"));
        }
        if report.started {
            print_success(&format!("proxy listening on port {}", cfg.port));
        }
        Ok(())
    }
}
