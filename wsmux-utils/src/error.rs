//! Error types for wsmux
//!
//! Provides a unified error type used across all wsmux crates.

use std::path::PathBuf;

/// Main error type for wsmux operations
#[derive(Debug, thiserror::Error)]
pub enum WsmuxError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Connection Errors ===

    #[error("Send to connection {client} failed: {reason}")]
    ConnectionSend { client: String, reason: String },

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    // === Session Errors ===

    #[error("Session not found: {0}")]
    UnknownSession(String),

    #[error("Session {0} has already exited")]
    WriteAfterExit(String),

    #[error("Invalid project reference '{project}': {reason}")]
    InvalidProject { project: String, reason: String },

    // === PTY Errors ===

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WsmuxError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a PTY error
    pub fn pty(msg: impl Into<String>) -> Self {
        Self::Pty(msg.into())
    }

    /// Create a spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid project error
    pub fn invalid_project(project: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProject {
            project: project.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error can be dropped without telling anyone
    ///
    /// Input racing a session exit and a single slow connection are both
    /// expected during normal operation.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::WriteAfterExit(_) | Self::ConnectionSend { .. })
    }
}

/// Result type alias using WsmuxError
pub type Result<T> = std::result::Result<T, WsmuxError>;
