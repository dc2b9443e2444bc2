//! Global constants used throughout the proxyctl codebase.
//!
//! This module contains timeout durations, poll budgets, default ports and
//! file names that are used across multiple modules. Defining them centrally
//! keeps the magic numbers discoverable.

use std::time::Duration;

/// Name of the managed proxy binary (without platform extension).
pub const PROXY_BINARY_NAME: &str = "cli-proxy-api";

/// Service/unit name used for OS-level registration.
pub const SERVICE_NAME: &str = "cli-proxy-api";

/// Label used for the launchd user agent on macOS.
pub const LAUNCHD_LABEL: &str = "com.cliproxyapi.proxy";

/// Upstream repository the proxy is built from.
pub const DEFAULT_REPO_URL: &str = "https://github.com/router-for-me/CLIProxyAPI.git";

/// Mainline branch tracked by `update`.
pub const DEFAULT_BRANCH: &str = "main";

/// Go package path of the proxy's entry point inside the source tree.
pub const BUILD_PACKAGE: &str = "./cmd/server";

/// Default listening port of the proxy.
pub const DEFAULT_PROXY_PORT: u16 = 8317;

/// Default port of the secondary router sitting in front of the proxy.
pub const DEFAULT_ROUTER_PORT: u16 = 3456;

/// Default port for `quota --web`.
pub const DEFAULT_QUOTA_PORT: u16 = 8319;

/// API key used when neither `.env` nor the environment provides one.
///
/// The proxy is usable without a real key for purely local access.
pub const PLACEHOLDER_API_KEY: &str = "sk-proxyctl-local";

/// File names inside an installation root.
pub const PROXY_CONFIG_FILE: &str = "config.yaml";
pub const DOTENV_FILE: &str = ".env";
pub const SOURCE_DIR: &str = "source";
pub const BIN_DIR: &str = "bin";
pub const LOG_DIR: &str = "logs";
pub const LOG_FILE: &str = "proxy.log";
pub const UPDATE_LOCK_FILE: &str = ".proxyctl.lock";

/// Suffix of the previous binary kept for rollback.
pub const BACKUP_SUFFIX: &str = "bak";

/// Suffix given to a binary that failed verification.
pub const FAILED_SUFFIX: &str = "failed";

/// Default directory (under home) holding per-account credential files.
pub const DEFAULT_AUTH_DIR: &str = ".cli-proxy-api";

/// Path polled to decide whether a freshly started proxy is alive.
pub const HEALTH_PATH: &str = "/";

/// Liveness poll: attempts and spacing.
pub const HEALTH_ATTEMPTS: u32 = 30;
pub const HEALTH_INTERVAL: Duration = Duration::from_millis(1000);

/// Timeout of a single liveness request.
pub const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Stop/start poll: attempts and spacing.
pub const PROCESS_POLL_ATTEMPTS: u32 = 20;
pub const PROCESS_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Timeout for `git fetch`/`git clone`.
pub const GIT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for a `go build` of the proxy.
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(900);

/// Timeout for asking a binary for its version.
pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Time-to-live of a provider's cached quota snapshot (5 minutes).
pub const QUOTA_CACHE_TTL: Duration = Duration::from_secs(300);

/// Per-request timeout for provider HTTP calls.
pub const QUOTA_HTTP_TIMEOUT: Duration = Duration::from_secs(8);

/// Upper bound for a whole provider batch.
pub const QUOTA_BATCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Debounce window for credential directory events.
pub const WATCH_DEBOUNCE: Duration = Duration::from_secs(1);

/// Tokens expiring within this margin are refreshed early.
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// Default number of log lines shown by `logs`.
pub const DEFAULT_LOG_LINES: usize = 50;

/// Platform-specific file name of the managed binary.
#[must_use]
pub fn proxy_binary_file_name() -> String {
    if cfg!(windows) {
        format!("{PROXY_BINARY_NAME}.exe")
    } else {
        PROXY_BINARY_NAME.to_string()
    }
}
