//! The binary, run against a temporary home with no proxy installed.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("root").join("logs")).unwrap();
        std::fs::create_dir_all(dir.path().join("auth")).unwrap();
        Self {
            dir,
        }
    }

    fn root(&self) -> std::path::PathBuf {
        self.dir.path().join("root")
    }

    fn auth(&self) -> std::path::PathBuf {
        self.dir.path().join("auth")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("proxyctl").unwrap();
        cmd.env("HOME", self.dir.path())
            .env("XDG_CONFIG_HOME", self.dir.path().join("config"))
            .env("PROXYCTL_SETTINGS", self.dir.path().join("settings.toml"))
            .env("PROXYCTL_HOME", self.root())
            .env("PROXYCTL_AUTH_DIR", self.auth())
            .env("PROXYCTL_NO_PROGRESS", "1")
            .env_remove("PROXYCTL_API_KEY")
            .env_remove("PROXYCTL_PORT")
            .env_remove("RUST_LOG")
            .env("NO_COLOR", "1");
        cmd
    }
}

fn write(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

#[test]
fn test_help_lists_commands() {
    let sandbox = Sandbox::new();
    sandbox.cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("install")
            .and(predicate::str::contains("update"))
            .and(predicate::str::contains("rollback"))
            .and(predicate::str::contains("quota"))
            .and(predicate::str::contains("diagnose")),
    );
}

#[test]
fn test_logs_prints_tail() {
    let sandbox = Sandbox::new();
    let lines: String = (1..=10).map(|i| format!("line {i}\n")).collect();
    write(&sandbox.root().join("logs").join("proxy.log"), &lines);

    sandbox
        .cmd()
        .args(["logs", "-n", "2"])
        .assert()
        .success()
        .stdout(predicate::eq("line 9\nline 10\n"));

    sandbox.cmd().args(["logs", "--all"]).assert().success().stdout(predicate::eq(lines));
}

#[test]
fn test_logs_without_file_warns() {
    let sandbox = Sandbox::new();
    sandbox.cmd().arg("logs").assert().success().stderr(predicate::str::contains("no log file"));
}

#[test]
fn test_quota_json_with_no_credentials() {
    let sandbox = Sandbox::new();
    let output = sandbox.cmd().args(["quota", "--json"]).output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    for provider in ["antigravity", "codex", "gemini"] {
        assert_eq!(body["providers"][provider]["total"], 0, "{provider}");
    }
}

#[test]
fn test_quota_single_provider_json() {
    let sandbox = Sandbox::new();
    let output = sandbox.cmd().args(["quota", "--provider", "codex", "--json", "--refresh"]).output().unwrap();
    assert!(output.status.success());
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["total"], 0);
    assert!(body["accounts"].as_array().unwrap().is_empty());
}

#[test]
fn test_quota_unknown_provider_fails() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["quota", "--provider", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope").and(predicate::str::contains("Known providers")));
}

#[test]
fn test_rollback_without_backup_fails() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .arg("rollback")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No backup available"));
}

#[test]
fn test_invalid_port_override_is_rejected() {
    let sandbox = Sandbox::new();
    sandbox.cmd().env("PROXYCTL_PORT", "not-a-port").arg("status").assert().failure().stderr(
        predicate::str::contains("PROXYCTL_PORT"),
    );
}
