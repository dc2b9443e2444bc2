//! launchd user agent (`~/Library/LaunchAgents/com.cliproxyapi.proxy.plist`).
//!
//! Loaded into the `gui/<uid>` domain. `KeepAlive` only restarts on unclean
//! exits, so a stop goes through `bootout` rather than a signal.

use super::command::{run_cmd, run_cmd_allow_failure, run_cmd_ignore_failure};
use super::{ManagedProcess, ServiceKind, UnitBackend};
use crate::constants::LAUNCHD_LABEL;
use crate::utils::{PollBudget, atomic_write, poll_until_true};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

pub struct LaunchdAgent {
    process: ManagedProcess,
    agents_dir: PathBuf,
}

impl LaunchdAgent {
    pub fn new(process: ManagedProcess) -> Result<Self> {
        let agents_dir = dirs::home_dir()
            .context("Unable to determine home directory for LaunchAgents")?
            .join("Library")
            .join("LaunchAgents");
        Ok(Self::with_agents_dir(process, agents_dir))
    }

    #[must_use]
    pub fn with_agents_dir(process: ManagedProcess, agents_dir: PathBuf) -> Self {
        Self {
            process,
            agents_dir,
        }
    }

    fn plist_file(&self) -> PathBuf {
        self.agents_dir.join(format!("{LAUNCHD_LABEL}.plist"))
    }

    #[must_use]
    pub fn render(&self) -> String {
        let p = &self.process;
        let args = std::iter::once(p.binary.display().to_string())
            .chain(p.launch_args())
            .map(|a| format!("        <string>{}</string>\n", xml_escape(&a)))
            .collect::<String>();
        let log = xml_escape(&p.log_file.display().to_string());
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
             <plist version=\"1.0\">\n\
             <dict>\n\
             \x20   <key>Label</key>\n\
             \x20   <string>{LAUNCHD_LABEL}</string>\n\
             \x20   <key>ProgramArguments</key>\n\
             \x20   <array>\n\
             {args}\
             \x20   </array>\n\
             \x20   <key>WorkingDirectory</key>\n\
             \x20   <string>{}</string>\n\
             \x20   <key>RunAtLoad</key>\n\
             \x20   <true/>\n\
             \x20   <key>KeepAlive</key>\n\
             \x20   <dict>\n\
             \x20       <key>SuccessfulExit</key>\n\
             \x20       <false/>\n\
             \x20   </dict>\n\
             \x20   <key>StandardOutPath</key>\n\
             \x20   <string>{log}</string>\n\
             \x20   <key>StandardErrorPath</key>\n\
             \x20   <string>{log}</string>\n\
             \x20   <key>ProcessType</key>\n\
             \x20   <string>Background</string>\n\
             </dict>\n\
             </plist>\n",
            xml_escape(&p.working_dir.display().to_string()),
        )
    }

    async fn domain() -> Result<String> {
        let uid = run_cmd("id", &["-u"]).await?;
        Ok(format!("gui/{uid}"))
    }

    async fn is_loaded(service: &str) -> bool {
        run_cmd_allow_failure("launchctl", &["print", service]).await.is_ok_and(|r| r.success)
    }
}

fn xml_escape(value: &str) -> String {
    value.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[async_trait]
impl UnitBackend for LaunchdAgent {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Launchd
    }

    fn unit_path(&self) -> Option<PathBuf> {
        Some(self.plist_file())
    }

    async fn is_registered(&self) -> Result<bool> {
        Ok(self.plist_file().is_file())
    }

    async fn register(&self) -> Result<()> {
        if let Some(dir) = self.process.log_file.parent() {
            crate::utils::ensure_dir(dir)?;
        }
        atomic_write(&self.plist_file(), self.render().as_bytes())?;
        tracing::info!(target: "service", "wrote launch agent {}", self.plist_file().display());
        Ok(())
    }

    async fn unregister(&self) -> Result<()> {
        let domain = Self::domain().await?;
        let service = format!("{domain}/{LAUNCHD_LABEL}");
        if Self::is_loaded(&service).await {
            run_cmd_ignore_failure("launchctl", &["bootout", &service]).await;
        }
        let plist = self.plist_file();
        if plist.exists() {
            std::fs::remove_file(&plist).with_context(|| format!("Failed to remove {}", plist.display()))?;
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let domain = Self::domain().await?;
        let service = format!("{domain}/{LAUNCHD_LABEL}");
        if !Self::is_loaded(&service).await {
            let plist = self.plist_file().display().to_string();
            run_cmd("launchctl", &["bootstrap", &domain, &plist]).await?;
        }
        run_cmd("launchctl", &["kickstart", "-k", &service]).await.map(|_| ())
    }

    async fn stop(&self) -> Result<()> {
        let domain = Self::domain().await?;
        let service = format!("{domain}/{LAUNCHD_LABEL}");
        run_cmd("launchctl", &["bootout", &service]).await?;

        // bootout returns before launchd has finished tearing the job down
        let unloaded = poll_until_true(PollBudget::new(20, Duration::from_millis(250)), || {
            let service = service.clone();
            async move { !Self::is_loaded(&service).await }
        })
        .await;
        if !unloaded {
            tracing::warn!(target: "service", "{service} still loaded after bootout");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plist() {
        let process = ManagedProcess {
            binary: PathBuf::from("/Users/me/cliproxyapi/bin/cli-proxy-api"),
            config_file: PathBuf::from("/Users/me/cliproxyapi/config.yaml"),
            working_dir: PathBuf::from("/Users/me/cliproxyapi"),
            log_file: PathBuf::from("/Users/me/cliproxyapi/logs/proxy.log"),
            port: 8317,
            budget: PollBudget::new(1, Duration::from_millis(1)),
        };
        let agent = LaunchdAgent::with_agents_dir(process, PathBuf::from("/Users/me/Library/LaunchAgents"));
        let plist = agent.render();

        assert!(plist.contains("<string>com.cliproxyapi.proxy</string>"));
        assert!(plist.contains("        <string>/Users/me/cliproxyapi/bin/cli-proxy-api</string>\n"));
        assert!(plist.contains("        <string>-config</string>\n"));
        assert!(plist.contains("<key>StandardErrorPath</key>\n    <string>/Users/me/cliproxyapi/logs/proxy.log</string>"));
        assert_eq!(
            agent.unit_path(),
            Some(PathBuf::from("/Users/me/Library/LaunchAgents/com.cliproxyapi.proxy.plist"))
        );
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("a&b<c>"), "a&amp;b&lt;c&gt;");
    }
}
