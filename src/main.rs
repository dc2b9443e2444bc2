//! proxyctl entry point.

use anyhow::Result;
use clap::Parser;
use proxyctl::cli;
use proxyctl::core::error::user_friendly_error;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // SAFETY: the runtime has not been built yet, so no other thread exists.
    unsafe { cli.build_config().apply_to_env() };

    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(format!("proxyctl={}", cli.log_directive())),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let runtime = tokio::runtime::Runtime::new()?;
    match runtime.block_on(cli.execute()) {
        Ok(()) => Ok(()),
        Err(e) => {
            user_friendly_error(e).display();
            std::process::exit(1);
        }
    }
}
