//! Configuration schema structs

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wsmux_utils::LogOutput;

use crate::pty::PtyConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sessions: SessionsConfig,
    pub projects: ProjectsConfig,
    pub logging: LoggingConfig,
}

/// Network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7681".into(),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen.parse().ok()
    }
}

/// Session lifecycle and shell settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Seconds a session survives with nobody attached
    pub idle_timeout_secs: u64,
    /// Replay buffer size per session, in bytes
    pub buffer_limit: usize,
    /// Shell to spawn (default: $SHELL, falling back to /bin/sh)
    pub shell: String,
    pub shell_args: Vec<String>,
    /// Value of TERM in the shell's environment
    pub term: String,
    pub default_cols: u16,
    pub default_rows: u16,
    /// Outbound messages queued per connection before it is detached
    pub client_queue_capacity: usize,
    /// Wait after SIGHUP before SIGKILL
    pub kill_grace_ms: u64,
    /// Wait after exit for trailing output
    pub exit_drain_ms: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 4 * 60 * 60,
            buffer_limit: 256 * 1024,
            shell: std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".into()),
            shell_args: Vec::new(),
            term: "xterm-256color".into(),
            default_cols: 80,
            default_rows: 24,
            client_queue_capacity: 1024,
            kill_grace_ms: 2000,
            exit_drain_ms: 250,
        }
    }
}

impl SessionsConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn exit_drain(&self) -> Duration {
        Duration::from_millis(self.exit_drain_ms)
    }

    /// Build the spawn configuration for a new shell
    pub fn pty_config(&self, cwd: &Path, cols: u16, rows: u16) -> PtyConfig {
        PtyConfig::new(self.shell.clone(), cwd)
            .args(self.shell_args.iter().cloned())
            .env("TERM", self.term.clone())
            .dimensions(cols, rows)
    }
}

/// Project directory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectsConfig {
    /// Directory holding one subdirectory per project
    pub root: PathBuf,
    /// Create a project directory on first use
    pub create_missing: bool,
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            root: wsmux_utils::home_dir().join("projects"),
            create_missing: true,
        }
    }
}

/// Log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive; `WSMUX_LOG` takes precedence
    pub filter: String,
    pub output: LogOutput,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            output: LogOutput::Stderr,
        }
    }
}
