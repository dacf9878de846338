//! JSON text-frame codec
//!
//! Inbound frames are validated here so the server only ever sees a closed
//! set of [`ClientMessage`] variants.

use serde_json::Value;

use crate::messages::{ClientMessage, ServerMessage};

/// Maximum accepted inbound frame size (1 MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Missing message type")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode one text frame from the browser
pub fn decode_client(text: &str) -> Result<ClientMessage, CodecError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: text.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let value: Value =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(_) | None => return Err(CodecError::MissingType),
    };

    if !ClientMessage::TYPES.contains(&kind.as_str()) {
        return Err(CodecError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Encode one server message as a text frame
pub fn encode_server(message: &ServerMessage) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_input() {
        let msg = decode_client(r#"{"type":"input","data":"echo hi\n"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Input {
                data: "echo hi\n".into()
            }
        );
    }

    #[test]
    fn test_decode_unknown_type() {
        let err = decode_client(r#"{"type":"paste","data":"x"}"#).unwrap_err();
        assert!(matches!(err, CodecError::UnknownType(ref t) if t == "paste"));
    }

    #[test]
    fn test_decode_missing_type() {
        assert!(matches!(
            decode_client(r#"{"data":"x"}"#).unwrap_err(),
            CodecError::MissingType
        ));
        assert!(matches!(
            decode_client(r#"{"type":7}"#).unwrap_err(),
            CodecError::MissingType
        ));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode_client("not json").unwrap_err(),
            CodecError::Malformed(_)
        ));
        // Known type, wrong field types
        assert!(matches!(
            decode_client(r#"{"type":"resize","cols":"wide","rows":30}"#).unwrap_err(),
            CodecError::Malformed(_)
        ));
    }

    #[test]
    fn test_decode_too_large() {
        let data = "x".repeat(MAX_FRAME_SIZE);
        let frame = format!(r#"{{"type":"input","data":"{}"}}"#, data);
        assert!(matches!(
            decode_client(&frame).unwrap_err(),
            CodecError::MessageTooLarge { .. }
        ));
    }

    #[test]
    fn test_encode_output() {
        let text = encode_server(&ServerMessage::Output { data: "a\"b".into() }).unwrap();
        assert_eq!(text, r#"{"type":"output","data":"a\"b"}"#);
    }
}
