//! Error handling for proxyctl
//!
//! The error system follows two principles:
//! 1. **Strongly-typed errors** ([`ProxyctlError`]) for precise handling in code
//! 2. **User-friendly messages** ([`ErrorContext`]) with actionable suggestions for CLI users
//!
//! # Error Categories
//!
//! - **Configuration**: [`ProxyctlError::InstallRootNotFound`], [`ProxyctlError::ConfigParseError`]
//! - **Build**: [`ProxyctlError::ToolNotFound`], [`ProxyctlError::GitCommandError`],
//!   [`ProxyctlError::BuildFailed`]
//! - **Deployment/verification**: [`ProxyctlError::HealthCheckFailed`],
//!   [`ProxyctlError::UpdateReverted`], [`ProxyctlError::RollbackFailed`]
//! - **Service manager**: [`ProxyctlError::ServiceError`], [`ProxyctlError::PortInUse`],
//!   [`ProxyctlError::ProcessStopFailed`]
//! - **Quota**: [`ProxyctlError::CredentialError`], [`ProxyctlError::TokenRefreshFailed`],
//!   [`ProxyctlError::QuotaApiError`]
//!
//! Quota errors are normally recorded on the affected account instead of being
//! propagated; they only surface as fatal when a whole command depends on them
//! (for example an unknown provider name).
//!
//! # Examples
//!
//! ```rust,no_run
//! use proxyctl::core::{ProxyctlError, user_friendly_error};
//!
//! let err = anyhow::Error::from(ProxyctlError::NoBackup {
//!     path: "/opt/cli-proxy-api/bin/cli-proxy-api.bak".to_string(),
//! });
//! user_friendly_error(err).display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// Every typed failure the control plane can report.
#[derive(Error, Debug)]
pub enum ProxyctlError {
    /// No installation root could be located.
    #[error("Installation root not found (searched: {})", searched.join(", "))]
    InstallRootNotFound {
        /// Locations that were checked, in resolution order
        searched: Vec<String>,
    },

    /// A configuration file that the command needs is missing.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// Expected location of the file
        path: String,
    },

    /// A configuration file exists but could not be parsed.
    #[error("Invalid configuration in {file}: {reason}")]
    ConfigParseError {
        /// The file that failed to parse
        file: String,
        /// Parser message
        reason: String,
    },

    /// A required external tool (git, go) is not on PATH.
    #[error("Required tool '{tool}' is not installed or not found in PATH")]
    ToolNotFound {
        /// Name of the missing executable
        tool: String,
    },

    /// A git invocation returned non-zero.
    #[error("Git operation failed: {operation}")]
    GitCommandError {
        /// The git operation that failed (e.g. "fetch", "reset")
        operation: String,
        /// Captured stderr of the command
        stderr: String,
    },

    /// Compiling the proxy failed. The deployed binary is untouched.
    #[error("Build failed: {reason}")]
    BuildFailed {
        /// Compiler output or timeout description
        reason: String,
    },

    /// Moving the new binary into place failed.
    #[error("Deployment failed: {reason}")]
    DeployFailed {
        /// What went wrong while replacing the binary
        reason: String,
    },

    /// The liveness poll never saw a successful response.
    #[error("Health check failed after {attempts} attempts: {url}")]
    HealthCheckFailed {
        /// Polled URL
        url: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// Verification failed but the previous binary was restored.
    #[error("Update failed, safely reverted to {restored}")]
    UpdateReverted {
        /// Version that is active again
        restored: String,
        /// Why the update was reverted
        reason: String,
    },

    /// Rollback itself failed; manual intervention is required.
    #[error("Rollback failed: {reason}")]
    RollbackFailed {
        /// Why the rollback did not succeed
        reason: String,
    },

    /// No backup binary exists.
    #[error("No backup available at {path}")]
    NoBackup {
        /// Expected location of the backup binary
        path: String,
    },

    /// Another update or rollback holds the install lock.
    #[error("Another update or rollback is in progress ({path})")]
    UpdateInProgress {
        /// Path of the held lock file
        path: String,
    },

    /// OS-level service manager failure.
    #[error("Service manager '{manager}' failed to {operation}: {reason}")]
    ServiceError {
        /// Service manager kind
        manager: String,
        /// Operation being attempted
        operation: String,
        /// Command output or description
        reason: String,
    },

    /// The proxy port is held by a process that is not the managed binary.
    #[error("Port {port} is already in use by another process")]
    PortInUse {
        /// The occupied port
        port: u16,
    },

    /// The managed process could not be started or never appeared.
    #[error("Failed to start {binary}: {reason}")]
    ProcessStartFailed {
        /// Binary path
        binary: String,
        /// Cause
        reason: String,
    },

    /// The managed process survived graceful and forced termination.
    #[error("Failed to stop process {pid}")]
    ProcessStopFailed {
        /// PID that would not exit
        pid: u32,
    },

    /// The managed binary has not been built yet.
    #[error("Proxy binary not found at {path}")]
    BinaryNotFound {
        /// Expected binary path
        path: String,
    },

    /// A quota provider name that is not registered.
    #[error("Unknown quota provider '{name}'")]
    UnknownProvider {
        /// Requested provider
        name: String,
    },

    /// A credential file is unreadable or lacks required fields.
    #[error("Invalid credential file {file}: {reason}")]
    CredentialError {
        /// Credential file name
        file: String,
        /// What is wrong with it
        reason: String,
    },

    /// Exchanging a refresh token failed.
    #[error("Token refresh failed: {reason}")]
    TokenRefreshFailed {
        /// Endpoint response or transport error
        reason: String,
    },

    /// A provider's quota endpoint returned an error.
    #[error("Quota API error ({status}): {message}")]
    QuotaApiError {
        /// HTTP status code, 0 for transport failures
        status: u16,
        /// Short description
        message: String,
    },

    /// The operation is not available on this platform or service variant.
    #[error("Operation not supported on this platform: {operation}")]
    PlatformNotSupported {
        /// What was attempted
        operation: String,
    },

    /// I/O error from the standard library
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Catch-all
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
    },
}

/// Error wrapper adding user-facing suggestions and details.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: ProxyctlError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a context with no suggestion or details.
    #[must_use]
    pub const fn new(error: ProxyctlError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add an actionable suggestion (printed in green).
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add an explanation of the failure (printed in yellow).
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error, details and suggestion to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Convert any error into an [`ErrorContext`] with suggestions.
///
/// Typed [`ProxyctlError`]s get a tailored suggestion; I/O errors are
/// classified by kind; anything else is wrapped as [`ProxyctlError::Other`]
/// with the full context chain preserved in the message.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let error = match error.downcast::<ProxyctlError>() {
        Ok(typed) => return create_error_context(typed),
        Err(other) => other,
    };

    let error = match error.downcast::<ErrorContext>() {
        Ok(ctx) => return ctx,
        Err(other) => other,
    };

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(ProxyctlError::Other {
                    message: format!("{error:#}"),
                })
                .with_suggestion(
                    "Check ownership of the installation root, or pass --root to a directory you own",
                )
                .with_details("proxyctl does not have permission to read or write a required file");
            }
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(ProxyctlError::Other {
                    message: format!("{error:#}"),
                })
                .with_suggestion("Run 'proxyctl diagnose' to see which paths were resolved");
            }
            _ => {}
        }
    }

    ErrorContext::new(ProxyctlError::Other {
        message: format!("{error:#}"),
    })
}

fn create_error_context(error: ProxyctlError) -> ErrorContext {
    match error {
        ProxyctlError::InstallRootNotFound { .. } => ErrorContext::new(error)
            .with_suggestion("Run 'proxyctl install' to create an installation, or point to an existing one with --root or PROXYCTL_HOME")
            .with_details("An installation root contains config.yaml, source/ or bin/"),

        ProxyctlError::ConfigNotFound { .. } => ErrorContext::new(error)
            .with_suggestion("Run 'proxyctl install' to write a default configuration"),

        ProxyctlError::ConfigParseError { ref file, .. } => {
            let suggestion = format!("Fix the syntax in {file} and rerun the command");
            ErrorContext::new(error).with_suggestion(suggestion)
        }

        ProxyctlError::ToolNotFound { ref tool } => {
            let suggestion = match tool.as_str() {
                "git" => "Install git from https://git-scm.com/ or your package manager (e.g. 'brew install git', 'apt install git')",
                "go" => "Install the Go toolchain from https://go.dev/dl/ and make sure 'go' is on PATH",
                _ => "Install the missing tool and make sure it is on PATH",
            };
            ErrorContext::new(error)
                .with_suggestion(suggestion)
                .with_details("proxyctl detects build prerequisites but never installs them")
        }

        ProxyctlError::GitCommandError { ref operation, ref stderr } => {
            let suggestion = if operation.contains("fetch") || operation.contains("clone") {
                "Check your network connection and that the repository URL is reachable"
            } else {
                "Inspect the source checkout; removing source/ and running 'proxyctl install' recreates it"
            };
            let details = stderr.trim().to_string();
            let ctx = ErrorContext::new(error).with_suggestion(suggestion);
            if details.is_empty() { ctx } else { ctx.with_details(details) }
        }

        ProxyctlError::BuildFailed { .. } => ErrorContext::new(error)
            .with_suggestion("Fix the build error upstream or retry later; 'proxyctl status' shows the running version")
            .with_details("The currently deployed binary was not modified and is still running"),

        ProxyctlError::DeployFailed { .. } => ErrorContext::new(error)
            .with_suggestion("Check permissions on the bin/ directory, then run 'proxyctl update --force'"),

        ProxyctlError::HealthCheckFailed { .. } => ErrorContext::new(error)
            .with_suggestion("Inspect recent output with 'proxyctl logs -n 100'"),

        ProxyctlError::UpdateReverted { ref reason, .. } => {
            let details = reason.clone();
            ErrorContext::new(error)
                .with_details(details)
                .with_suggestion("Inspect 'proxyctl logs -n 100'; the previous version is running again")
        }

        ProxyctlError::RollbackFailed { .. } => ErrorContext::new(error)
            .with_details("The proxy may not be running. Automatic recovery has been exhausted")
            .with_suggestion("Restore manually: copy a known-good binary into bin/, then run 'proxyctl start' and 'proxyctl status'"),

        ProxyctlError::NoBackup { .. } => ErrorContext::new(error)
            .with_suggestion("A backup is created by 'proxyctl update'; nothing to roll back to yet"),

        ProxyctlError::UpdateInProgress { .. } => ErrorContext::new(error)
            .with_suggestion("Wait for the running update to finish and try again"),

        ProxyctlError::ServiceError { .. } => ErrorContext::new(error)
            .with_suggestion("The proxy can still be run without OS integration: 'proxyctl start' spawns it directly")
            .with_details("Auto-start registration is optional"),

        ProxyctlError::PortInUse { port } => ErrorContext::new(error)
            .with_suggestion(format!(
                "Stop the process listening on {port}, or set PROXYCTL_PORT / 'port:' in config.yaml"
            )),

        ProxyctlError::ProcessStartFailed { .. } => ErrorContext::new(error)
            .with_suggestion("Inspect 'proxyctl logs -n 100' for startup errors"),

        ProxyctlError::ProcessStopFailed { pid } => ErrorContext::new(error)
            .with_suggestion(if cfg!(windows) {
                format!("Terminate it manually: taskkill /F /PID {pid}")
            } else {
                format!("Terminate it manually: kill -9 {pid}")
            }),

        ProxyctlError::BinaryNotFound { .. } => ErrorContext::new(error)
            .with_suggestion("Run 'proxyctl install' or 'proxyctl update --force' to build it"),

        ProxyctlError::UnknownProvider { .. } => ErrorContext::new(error)
            .with_suggestion("Known providers: antigravity, codex, gemini"),

        ProxyctlError::CredentialError { .. } | ProxyctlError::TokenRefreshFailed { .. } => {
            ErrorContext::new(error)
                .with_suggestion("Log in again through the proxy to regenerate the credential file")
        }

        ProxyctlError::QuotaApiError { .. } => ErrorContext::new(error)
            .with_suggestion("Retry later; quota is refreshed on the next request"),

        ProxyctlError::PlatformNotSupported { .. } => ErrorContext::new(error)
            .with_details("No supported service manager was detected on this system"),

        ProxyctlError::YamlError(_) => ErrorContext::new(error)
            .with_suggestion("Check the YAML syntax of config.yaml"),

        ProxyctlError::TomlError(_) => ErrorContext::new(error)
            .with_suggestion("Check the TOML syntax of settings.toml"),

        _ => ErrorContext::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_display() {
        let error = ProxyctlError::PortInUse {
            port: 8317,
        };
        assert_eq!(error.to_string(), "Port 8317 is already in use by another process");

        let error = ProxyctlError::InstallRootNotFound {
            searched: vec!["/a".into(), "/b".into()],
        };
        assert_eq!(error.to_string(), "Installation root not found (searched: /a, /b)");

        let error = ProxyctlError::GitCommandError {
            operation: "fetch".to_string(),
            stderr: "could not resolve host".to_string(),
        };
        assert_eq!(error.to_string(), "Git operation failed: fetch");
    }

    #[test]
    fn test_error_context_display() {
        let ctx = ErrorContext::new(ProxyctlError::NoBackup {
            path: "/x/bin/cli-proxy-api.bak".into(),
        })
        .with_suggestion("run update first");

        let display = format!("{ctx}");
        assert!(display.contains("No backup available at /x/bin/cli-proxy-api.bak"));
        assert!(display.contains("Suggestion: run update first"));
        assert!(!display.contains("Details:"));
    }

    #[test]
    fn test_user_friendly_typed_error() {
        let err = anyhow::Error::from(ProxyctlError::ToolNotFound {
            tool: "go".into(),
        });
        let ctx = user_friendly_error(err);
        assert!(ctx.suggestion.as_deref().is_some_and(|s| s.contains("go.dev")));
    }

    #[test]
    fn test_user_friendly_keeps_typed_error_behind_context() {
        let err = Err::<(), _>(ProxyctlError::NoBackup {
            path: "p".into(),
        })
        .context("rollback")
        .unwrap_err();
        let ctx = user_friendly_error(err);
        assert!(matches!(ctx.error, ProxyctlError::NoBackup { .. }));
    }

    #[test]
    fn test_user_friendly_generic_error() {
        let ctx = user_friendly_error(anyhow::anyhow!("something odd"));
        assert_eq!(ctx.error.to_string(), "something odd");
        assert!(ctx.suggestion.is_none());
    }

    #[test]
    fn test_git_error_includes_stderr_details() {
        let ctx = user_friendly_error(
            ProxyctlError::GitCommandError {
                operation: "fetch origin main".into(),
                stderr: "fatal: unable to access\n".into(),
            }
            .into(),
        );
        assert_eq!(ctx.details.as_deref(), Some("fatal: unable to access"));
        assert!(ctx.suggestion.as_deref().is_some_and(|s| s.contains("network")));
    }
}
