//! Shared data types

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest session identifier accepted from a client
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Opaque session identifier
///
/// Server-generated ids are UUIDv4 strings; ids arriving from clients are
/// only accepted if they are non-empty, at most [`MAX_SESSION_ID_LEN`]
/// characters, and drawn from `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Validate a client-supplied identifier
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_SESSION_ID_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dimensions {
    pub cols: u16,
    pub rows: u16,
}

impl Dimensions {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Validate client-reported dimensions
    ///
    /// Returns `None` for non-positive values or values that do not fit a
    /// terminal size.
    pub fn from_client(cols: i64, rows: i64) -> Option<Self> {
        let cols = u16::try_from(cols).ok().filter(|c| *c > 0)?;
        let rows = u16::try_from(rows).ok().filter(|r| *r > 0)?;
        Some(Self { cols, rows })
    }
}

/// Point-in-time description of a live session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: SessionId,
    /// Unix timestamp (seconds)
    pub created_at: u64,
    pub cwd: String,
    pub cols: u16,
    pub rows: u16,
    /// Number of connections attached right now
    pub attached: usize,
}

/// Query parameters carried by the WebSocket URL
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub session_id: Option<String>,
    pub project: Option<String>,
    /// Non-numeric values read as absent
    #[serde(default, deserialize_with = "lenient_int")]
    pub cols: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub rows: Option<i64>,
}

fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| value.trim().parse().ok()))
}

/// What a connection wants to do, derived from [`ConnectParams`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    /// Attach to an existing session; never creates one
    Attach(String),
    /// Start a new session, optionally rooted in a project
    Create { project: Option<String> },
}

impl ConnectParams {
    /// Resolve the connection target
    ///
    /// A non-empty `sessionId` always means attach, even when a project is
    /// also present.
    pub fn target(&self) -> ConnectTarget {
        match self.session_id.as_deref() {
            Some(id) if !id.is_empty() => ConnectTarget::Attach(id.to_string()),
            _ => ConnectTarget::Create {
                project: self.project.clone().filter(|p| !p.is_empty()),
            },
        }
    }

    /// Initial dimensions requested for a new session, if valid
    pub fn dimensions(&self) -> Option<Dimensions> {
        Dimensions::from_client(self.cols?, self.rows?)
    }
}
