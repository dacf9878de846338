//! Default configuration values
//!
//! Written out by `wsmux-server --print-config` as a starting point.

/// Default configuration as TOML
pub const DEFAULT_CONFIG_TOML: &str = r##"
# wsmux configuration

[server]
listen = "127.0.0.1:7681"

[sessions]
# Seconds a session is kept with no connection attached (4 hours)
idle_timeout_secs = 14400
# Replay buffer per session, in bytes
buffer_limit = 262144
# shell = "/bin/bash"
shell_args = []
term = "xterm-256color"
default_cols = 80
default_rows = 24
client_queue_capacity = 1024
kill_grace_ms = 2000
exit_drain_ms = 250

[projects]
# A leading ~ expands to the home directory
# root = "/srv/projects"
create_missing = true

[logging]
# Overridden by WSMUX_LOG
filter = "info"
# stderr, file, or both
output = "stderr"
"##;
