//! wsmux-protocol: Shared definitions for browser-server communication
//!
//! This crate defines the JSON text-frame messages exchanged over the
//! terminal WebSocket, the session identifier type, and the session
//! summaries served to the administrative HTTP layer.

pub mod codec;
pub mod messages;
pub mod types;

// Re-export main types at crate root
pub use codec::{decode_client, encode_server, CodecError};
pub use messages::{close_code, ClientMessage, ServerMessage};
pub use types::{ConnectParams, ConnectTarget, Dimensions, SessionId, SessionSummary};
