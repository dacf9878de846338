//! wsmux-utils: Common utilities shared across wsmux crates
//!
//! This crate provides:
//! - Unified error types ([`WsmuxError`], [`Result`])
//! - Logging infrastructure ([`init_logging_with_config`], [`LogConfig`])
//! - XDG-compliant path utilities ([`paths`] module)

pub mod error;
pub mod logging;
pub mod paths;

// Re-export main types at crate root for convenience
pub use error::{Result, WsmuxError};
pub use logging::{init_logging_with_config, LogConfig, LogOutput, LOG_ENV_VAR};

pub use paths::{config_dir, config_file, expand_home, home_dir, log_dir, state_dir};
