//! Core types shared by every proxyctl subsystem.
//!
//! Currently this is the error layer:
//! - [`ProxyctlError`] - enumerated failure modes for the control plane
//! - [`ErrorContext`] - user-facing wrapper carrying suggestions and details
//! - [`user_friendly_error`] - converts any `anyhow::Error` into an [`ErrorContext`]
//!
//! Commands return `anyhow::Result` and attach `.context()` at call sites; the
//! binary entry point turns whatever bubbles up into an [`ErrorContext`],
//! prints it, and exits with status 1.

pub mod error;

pub use error::{ErrorContext, ProxyctlError, user_friendly_error};
