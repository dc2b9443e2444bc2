//! Command-line interface for proxyctl.
//!
//! Each command lives in its own module with a clap `Args` (or
//! `Subcommand`) type and an `execute` method taking the shared
//! [`CommandContext`].
//!
//! | command | does |
//! |---|---|
//! | `install` | clone, build, configure, register and start the proxy |
//! | `start` / `stop` / `restart` | lifecycle through the platform service manager |
//! | `status` | process, port, service and version facts |
//! | `logs` | print or follow the proxy log |
//! | `update` | pull, rebuild, redeploy with automatic rollback |
//! | `rollback` | restore the binary kept by the last update |
//! | `quota` | account quota as a table, JSON, or a local dashboard |
//! | `autostart` | register or remove the login unit |
//! | `diagnose` | everything useful for a bug report |
//!
//! # Examples
//!
//! ```bash
//! proxyctl install
//! proxyctl update --dry-run
//! proxyctl quota --provider codex --json
//! proxyctl quota --web --port 9000
//! proxyctl logs -f
//! ```

mod autostart;
pub mod common;
mod diagnose;
mod install;
mod logs;
mod quota;
mod rollback;
mod service;
mod status;
mod update;

use anyhow::Result;
use clap::{Parser, Subcommand};
use common::CommandContext;
use std::path::PathBuf;

pub use logs::tail_lines;
pub use quota::format_reset;

/// Process-wide settings derived from global flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliConfig {
    pub no_progress: bool,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Export the settings to the environment read by the rest of the crate.
    ///
    /// # Safety
    ///
    /// Mutates the process environment; call before any other thread exists.
    pub unsafe fn apply_to_env(&self) {
        if self.no_progress {
            // SAFETY: upheld by the caller.
            unsafe { std::env::set_var(crate::utils::progress::NO_PROGRESS_ENV, "1") };
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "proxyctl",
    about = "Build, run, update and monitor a local cli-proxy-api installation",
    version,
    long_about = "proxyctl installs cli-proxy-api from source, keeps it running under the \
                  platform service manager, updates it with automatic rollback, and reports \
                  remaining quota for the accounts it proxies."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Installation root (defaults to PROXYCTL_HOME, the settings file, or a search of common locations)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable spinners
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install the proxy from source and start it
    Install(install::InstallCommand),
    /// Start the proxy
    Start(service::StartCommand),
    /// Stop the proxy
    Stop(service::StopCommand),
    /// Restart the proxy
    Restart(service::RestartCommand),
    /// Show process, service and version status
    Status(status::StatusCommand),
    /// Print or follow the proxy log
    Logs(logs::LogsCommand),
    /// Update to the latest source with automatic rollback
    Update(update::UpdateCommand),
    /// Restore the previous binary
    Rollback(rollback::RollbackCommand),
    /// Show remaining account quota
    Quota(quota::QuotaCommand),
    /// Manage start at login
    Autostart {
        #[command(subcommand)]
        action: autostart::AutostartCommand,
    },
    /// Print diagnostics for troubleshooting
    Diagnose(diagnose::DiagnoseCommand),
}

impl Cli {
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        CliConfig {
            no_progress: self.no_progress,
        }
    }

    /// Default tracing directive for the verbosity flags; `RUST_LOG` wins.
    #[must_use]
    pub const fn log_directive(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        }
    }

    pub async fn execute(self) -> Result<()> {
        let ctx = CommandContext::load(self.root).await?;
        match self.command {
            Commands::Install(cmd) => cmd.execute(&ctx).await,
            Commands::Start(cmd) => cmd.execute(&ctx).await,
            Commands::Stop(cmd) => cmd.execute(&ctx).await,
            Commands::Restart(cmd) => cmd.execute(&ctx).await,
            Commands::Status(cmd) => cmd.execute(&ctx).await,
            Commands::Logs(cmd) => cmd.execute(&ctx).await,
            Commands::Update(cmd) => cmd.execute(&ctx).await,
            Commands::Rollback(cmd) => cmd.execute(&ctx).await,
            Commands::Quota(cmd) => cmd.execute(&ctx).await,
            Commands::Autostart {
                action,
            } => action.execute(&ctx).await,
            Commands::Diagnose(cmd) => cmd.execute(&ctx).await,
        }
    }
}
