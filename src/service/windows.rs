//! Windows Task Scheduler task started at logon.
//!
//! The task runs the proxy through `cmd /c` so its output can be appended
//! to the log file.

use super::command::{run_cmd, run_cmd_allow_failure};
use super::{ManagedProcess, ServiceKind, UnitBackend};
use crate::constants::SERVICE_NAME;
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

pub struct ScheduledTask {
    process: ManagedProcess,
}

impl ScheduledTask {
    #[must_use]
    pub fn new(process: ManagedProcess) -> Self {
        Self {
            process,
        }
    }

    /// The `/TR` command line of the task.
    #[must_use]
    pub fn task_command(&self) -> String {
        let p = &self.process;
        format!(
            "cmd /c cd /d \"{}\" && \"{}\" -config \"{}\" >> \"{}\" 2>&1",
            p.working_dir.display(),
            p.binary.display(),
            p.config_file.display(),
            p.log_file.display()
        )
    }
}

#[async_trait]
impl UnitBackend for ScheduledTask {
    fn kind(&self) -> ServiceKind {
        ServiceKind::TaskScheduler
    }

    fn unit_path(&self) -> Option<PathBuf> {
        None
    }

    async fn is_registered(&self) -> Result<bool> {
        let result = run_cmd_allow_failure("schtasks", &["/Query", "/TN", SERVICE_NAME]).await?;
        Ok(result.success)
    }

    async fn register(&self) -> Result<()> {
        if let Some(dir) = self.process.log_file.parent() {
            crate::utils::ensure_dir(dir)?;
        }
        let command = self.task_command();
        run_cmd(
            "schtasks",
            &["/Create", "/TN", SERVICE_NAME, "/TR", &command, "/SC", "ONLOGON", "/RL", "LIMITED", "/F"],
        )
        .await?;
        tracing::info!(target: "service", "registered scheduled task {SERVICE_NAME}");
        Ok(())
    }

    async fn unregister(&self) -> Result<()> {
        if self.is_registered().await? {
            run_cmd("schtasks", &["/Delete", "/TN", SERVICE_NAME, "/F"]).await?;
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        run_cmd("schtasks", &["/Run", "/TN", SERVICE_NAME]).await.map(|_| ())
    }

    async fn stop(&self) -> Result<()> {
        // /End only stops the cmd wrapper; the controller terminates the
        // proxy itself afterwards if it is still alive
        run_cmd("schtasks", &["/End", "/TN", SERVICE_NAME]).await.map(|_| ())
    }
}
