//! Replay buffer for session scrollback
//!
//! Holds the most recent PTY output of a session so a newly attached
//! connection can be shown what is already on screen. Escape sequences are
//! kept as-is for faithful replay.

use std::sync::atomic::{AtomicUsize, Ordering};

use lazy_static::lazy_static;
use regex::Regex;

/// Total bytes held across all replay buffers
static GLOBAL_BUFFER_BYTES: AtomicUsize = AtomicUsize::new(0);

lazy_static! {
    /// ANSI CSI sequences plus OSC strings terminated by BEL or ST
    static ref ANSI_ESCAPE: Regex = Regex::new(
        r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[()][0-9A-Za-z]|\x1b[=>]"
    )
    .unwrap();
}

/// Get total replay-buffer memory across all sessions
pub fn global_buffer_bytes() -> usize {
    GLOBAL_BUFFER_BYTES.load(Ordering::Relaxed)
}

/// Remove terminal escape sequences from `text`
pub fn strip_escapes(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Bounded, tail-preserving output buffer
#[derive(Debug)]
pub struct ReplayBuffer {
    data: String,
    limit: usize,
}

impl ReplayBuffer {
    /// Create an empty buffer holding at most `limit` bytes
    pub fn new(limit: usize) -> Self {
        Self {
            data: String::new(),
            limit,
        }
    }

    /// Current size in bytes
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Everything currently held, oldest first
    pub fn contents(&self) -> &str {
        &self.data
    }

    /// Append a chunk, dropping the oldest bytes past the limit
    ///
    /// The cut always lands on a character boundary, so the buffer may hold
    /// up to three bytes less than `limit` after a trim.
    pub fn push(&mut self, chunk: &str) {
        let before = self.data.len();

        if chunk.len() >= self.limit {
            let start = ceil_char_boundary(chunk, chunk.len() - self.limit);
            self.data.clear();
            self.data.push_str(&chunk[start..]);
        } else {
            self.data.push_str(chunk);
            if self.data.len() > self.limit {
                let excess = self.data.len() - self.limit;
                let cut = ceil_char_boundary(&self.data, excess);
                self.data.drain(..cut);
            }
        }

        let after = self.data.len();
        if after >= before {
            GLOBAL_BUFFER_BYTES.fetch_add(after - before, Ordering::Relaxed);
        } else {
            GLOBAL_BUFFER_BYTES.fetch_sub(before - after, Ordering::Relaxed);
        }
    }

    /// The last `max_lines` logical lines
    ///
    /// Lines are split on `\n` with a trailing `\r` removed; a final empty
    /// line left by a trailing newline does not count.
    pub fn tail_lines(&self, max_lines: usize, strip: bool) -> String {
        if max_lines == 0 || self.data.is_empty() {
            return String::new();
        }

        let text = if strip {
            strip_escapes(&self.data)
        } else {
            self.data.clone()
        };

        let mut lines: Vec<&str> = text
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .collect();
        if lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }

        let start = lines.len().saturating_sub(max_lines);
        lines[start..].join("\n")
    }
}

impl Drop for ReplayBuffer {
    fn drop(&mut self) {
        GLOBAL_BUFFER_BYTES.fetch_sub(self.data.len(), Ordering::Relaxed);
    }
}

/// Smallest char boundary at or after `index`
fn ceil_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
