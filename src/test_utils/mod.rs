//! Test support: fakes for every external collaborator and a throwaway
//! installation root wired to them.
//!
//! # Example
//!
//! ```rust,no_run
//! use proxyctl::test_utils::TestInstall;
//! use proxyctl::upgrade::UpdateOptions;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let env = TestInstall::deployed("v1.0.0").await?;
//! env.source.publish("v1.1.0");
//! env.updater().run(UpdateOptions::default()).await?;
//! assert_eq!(env.active_version().as_deref(), Some("v1.1.0"));
//! # Ok(())
//! # }
//! ```

pub mod environment;
pub mod fakes;
pub mod git_helper;

pub use environment::TestInstall;
pub use fakes::{
    FakeBinaryProbe, FakeBuilder, FakeHealthProbe, FakeQuotaProvider, FakeServiceManager, FakeSourceTree,
};
pub use git_helper::TestGit;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests, once per process.
///
/// Uses `level` when given, else `RUST_LOG`; does nothing when neither is
/// set.
///
/// ```bash
/// RUST_LOG=proxyctl=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true) // show "git" and "service" targets
            .with_thread_ids(false)
            .try_init();
    });
}
