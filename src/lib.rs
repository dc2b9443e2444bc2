//! proxyctl: a local control plane for a self-hosted `cli-proxy-api`.
//!
//! The crate builds the proxy from a git checkout, deploys it next to a
//! backup of the previous binary, supervises it through the platform's
//! service manager, and reports remaining quota for the provider accounts
//! whose credentials the proxy uses.
//!
//! # Modules
//!
//! ## Update and rollback
//! - [`source`] / [`git`] - the source checkout and its revisions
//! - [`build`] - compiling the proxy with build metadata stamped in
//! - [`version`] - what version is checked out, installed, running and backed up
//! - [`upgrade`] - the update state machine, backups, rollback and the update lock
//! - [`installer`] - first-time installation
//!
//! ## Supervision
//! - [`service`] - launchd, systemd, Task Scheduler or a directly spawned process
//! - [`config`] - installation root discovery, `.env`, `config.yaml` and settings
//!
//! ## Quota
//! - [`quota`] - credential files, token refresh, provider adapters and the cache
//! - [`server`] - the JSON API and dashboard
//!
//! ## Shared
//! - [`cli`], [`core`], [`constants`], [`utils`]

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod utils;

pub mod build;
pub mod git;
pub mod installer;
pub mod source;
pub mod upgrade;
pub mod version;

pub mod service;

pub mod quota;
pub mod server;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
