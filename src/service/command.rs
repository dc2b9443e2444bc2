//! External command runner for service-manager tools
//! (`systemctl`, `launchctl`, `schtasks`, `id`).

use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct CmdResult {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub status_code: Option<i32>,
}

impl CmdResult {
    /// Best available failure description.
    #[must_use]
    pub fn failure_text(&self) -> String {
        let text = if self.stderr.trim().is_empty() { self.stdout.trim() } else { self.stderr.trim() };
        if text.is_empty() {
            format!("exit status {:?}", self.status_code)
        } else {
            truncate_for_log(text)
        }
    }
}

/// Run `program`, returning its output whatever the exit status.
pub async fn run_cmd_allow_failure(program: &str, args: &[&str]) -> Result<CmdResult> {
    tracing::debug!(target: "service", program, args = ?args, "executing external command");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("failed to execute {program}"))?;

    let result = CmdResult {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        success: output.status.success(),
        status_code: output.status.code(),
    };
    tracing::debug!(
        target: "service",
        program,
        status = ?result.status_code,
        stderr = %truncate_for_log(&result.stderr),
        "external command finished"
    );
    Ok(result)
}

/// Run `program` and fail with its stderr on a non-zero exit.
pub async fn run_cmd(program: &str, args: &[&str]) -> Result<String> {
    let result = run_cmd_allow_failure(program, args).await?;
    if !result.success {
        anyhow::bail!("{program} {} failed: {}", args.join(" "), result.failure_text());
    }
    Ok(result.stdout.trim().to_owned())
}

/// Run `program`, logging a warning instead of failing.
pub async fn run_cmd_ignore_failure(program: &str, args: &[&str]) {
    match run_cmd_allow_failure(program, args).await {
        Ok(result) if !result.success => tracing::warn!(
            target: "service",
            program,
            args = ?args,
            stderr = %result.failure_text(),
            "external command failed (ignored)"
        ),
        Ok(_) => {}
        Err(e) => tracing::warn!(target: "service", program, "external command failed (ignored): {e:#}"),
    }
}

fn truncate_for_log(value: &str) -> String {
    const MAX: usize = 300;
    if value.len() <= MAX {
        value.to_owned()
    } else {
        let mut end = MAX;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &value[..end])
    }
}
