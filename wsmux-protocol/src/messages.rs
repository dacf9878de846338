//! Client-server message types
//!
//! Every frame is a JSON object discriminated by its `type` field.

use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, SessionId};

/// Messages sent from the browser to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Keystrokes or pasted text for the shell
    #[serde(rename = "input")]
    Input { data: String },

    /// Terminal viewport changed
    ///
    /// Kept as raw integers so out-of-range values can be ignored rather
    /// than failing the whole frame.
    #[serde(rename = "resize")]
    Resize { cols: i64, rows: i64 },
}

impl ClientMessage {
    /// The `type` tags this enum accepts
    pub const TYPES: &'static [&'static str] = &["input", "resize"];

    /// Validated dimensions of a resize request
    pub fn resize_dimensions(&self) -> Option<Dimensions> {
        match self {
            Self::Resize { cols, rows } => Dimensions::from_client(*cols, *rows),
            _ => None,
        }
    }
}

/// Messages sent from the server to the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// A new session was created for this connection
    #[serde(rename = "sessionID")]
    SessionId {
        #[serde(rename = "sessionID")]
        session_id: SessionId,
    },

    /// Terminal output (or replayed scrollback)
    #[serde(rename = "output")]
    Output { data: String },

    /// The shell process terminated
    #[serde(rename = "exit")]
    Exit {
        #[serde(rename = "exitCode")]
        exit_code: i32,
        signal: Option<i32>,
    },

    /// Resolution failed or a frame was rejected
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// WebSocket close codes used by the terminal endpoint
pub mod close_code {
    /// Session ended normally
    pub const NORMAL: u16 = 1000;
    /// Explicit session id does not exist
    pub const UNKNOWN_SESSION: u16 = 4004;
    /// Connection fell behind the session's output and was detached
    pub const DETACHED: u16 = 4008;
    /// Session could not be spawned or its directory resolved
    pub const SPAWN_FAILED: u16 = 4500;
}
