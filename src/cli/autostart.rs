//! Register or remove the OS auto-start unit.

use super::common::{CommandContext, print_success, print_warning};
use crate::service::manual_autostart_hint;
use anyhow::Result;
use clap::Subcommand;

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum AutostartCommand {
    /// Start the proxy at login
    Enable,
    /// Stop starting the proxy at login
    Disable,
}

impl AutostartCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let cfg = ctx.install_config()?;
        let service = ctx.service(&cfg)?;
        match self {
            Self::Enable => {
                if let Err(e) = service.register_autostart().await {
                    print_warning(&format!("to start the proxy at login manually, {}", manual_autostart_hint(&cfg)));
                    return Err(e);
                }
                match service.unit_path() {
                    Some(path) => print_success(&format!("auto-start enabled ({})", path.display())),
                    None => print_success("auto-start enabled"),
                }
            }
            Self::Disable => {
                service.unregister_autostart().await?;
                print_success("auto-start disabled");
            }
        }
        Ok(())
    }
}
