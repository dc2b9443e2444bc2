//! Cross-platform utilities shared by the proxyctl subsystems.
//!
//! - [`fs`] - atomic writes, executable bits, rename-with-fallback moves
//! - [`platform`] - path expansion, tool discovery, WSL/systemd probing
//! - [`poll`] - the bounded "retry until predicate" helper used for every wait
//! - [`progress`] - spinners that respect `--no-progress`

pub mod fs;
pub mod platform;
pub mod poll;
pub mod progress;

pub use fs::{atomic_write, ensure_dir, move_file, set_executable};
pub use platform::{command_exists, is_windows, resolve_path};
pub use poll::{PollBudget, poll_until, poll_until_true};
pub use progress::ProgressBar;
