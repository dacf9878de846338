//! PTY management for wsmux server
//!
//! Spawns shells on pseudo-terminals via portable-pty. Output and exit
//! notices are delivered on a per-process event channel fed by helper
//! threads, so no async task ever blocks on PTY I/O.

mod config;
mod handle;
mod output;

pub use config::PtyConfig;
pub use handle::PtyProcess;
pub use output::{ExitInfo, PtyEvent};
