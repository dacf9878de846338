//! Command-line argument parsing for the wsmux server

use std::path::PathBuf;

use clap::Parser;

use crate::config::AppConfig;

/// wsmux - WebSocket terminal session server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to the XDG config location)
    #[arg(long, short = 'c', env = "WSMUX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:7681
    #[arg(long, short = 'l')]
    pub listen: Option<String>,

    /// Seconds a session may stay detached before it is closed
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Directory that `project` names are resolved against
    #[arg(long)]
    pub projects_root: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "wsmux_server=trace"
    #[arg(long)]
    pub log: Option<String>,

    /// Print the default configuration file and exit
    #[arg(long, default_value_t = false)]
    pub print_config: bool,
}

impl Args {
    /// Apply command-line overrides on top of file configuration
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(listen) = &self.listen {
            config.server.listen = listen.clone();
        }
        if let Some(secs) = self.idle_timeout {
            config.sessions.idle_timeout_secs = secs;
        }
        if let Some(root) = &self.projects_root {
            config.projects.root = root.clone();
        }
        if let Some(filter) = &self.log {
            config.logging.filter = filter.clone();
        }
    }
}
