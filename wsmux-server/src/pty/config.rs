//! What to run on a new PTY

use std::path::PathBuf;

use portable_pty::{CommandBuilder, PtySize};
use wsmux_protocol::Dimensions;

/// Spawn parameters for one shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Directory the shell starts in; must already exist
    pub cwd: PathBuf,
    /// Extra environment on top of the server's own
    pub env: Vec<(String, String)>,
    pub dimensions: Dimensions,
}

impl PtyConfig {
    /// Run `program` in `cwd` at 80x24 with no extra arguments
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
            dimensions: Dimensions::new(80, 24),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set `key`, replacing an earlier value for the same key
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.env.retain(|(existing, _)| *existing != key);
        self.env.push((key, value.into()));
        self
    }

    pub fn dimensions(mut self, cols: u16, rows: u16) -> Self {
        self.dimensions = Dimensions::new(cols, rows);
        self
    }

    pub(crate) fn pty_size(&self) -> PtySize {
        PtySize {
            cols: self.dimensions.cols,
            rows: self.dimensions.rows,
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    pub(crate) fn command(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        cmd.cwd(&self.cwd);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}
