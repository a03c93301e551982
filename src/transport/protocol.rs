//! Wire protocol for the duplex sync channel
//!
//! Every message is one WebSocket text frame holding one JSON envelope of the
//! form `{"type": ..., "content": ...}`. The tag is authoritative: unknown
//! tags and malformed payloads decode to [`DecodeError`] and are dropped by
//! the caller, never allowed to take the channel down.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One file in a [`SyncMessage::Files`] payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    /// File name as presented by the source clipboard
    pub name: String,
    /// Raw file bytes
    pub bytes: Vec<u8>,
}

/// Clipboard sync message envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum SyncMessage {
    /// Plain text clipboard content
    Text(String),
    /// Encoded bitmap clipboard content
    Image(String),
    /// Ordered file set clipboard content
    Files(Vec<FileEntry>),
    /// Handshake confirmation carrying the sender's role label
    ConnectionConfirm(String),
}

/// Codec errors for the message envelope
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unknown tag or payload that does not match its tag
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl SyncMessage {
    /// Serialize into one text frame payload
    pub fn encode(&self) -> Result<String, DecodeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize a text frame payload
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Short tag name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::Text(_) => "text",
            SyncMessage::Image(_) => "image",
            SyncMessage::Files(_) => "files",
            SyncMessage::ConnectionConfirm(_) => "connection_confirm",
        }
    }
}

impl fmt::Display for SyncMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn roundtrip(msg: SyncMessage) {
        let encoded = msg.encode().unwrap();
        let decoded = SyncMessage::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_text_roundtrip() {
        roundtrip(SyncMessage::Text("hello from the other machine".to_string()));
    }

    #[test]
    fn test_image_roundtrip() {
        roundtrip(SyncMessage::Image("iVBORw0KGgoAAAANSUhEUg==".to_string()));
    }

    #[test]
    fn test_files_roundtrip() {
        roundtrip(SyncMessage::Files(vec![
            FileEntry {
                name: "notes.txt".to_string(),
                bytes: b"meeting at ten".to_vec(),
            },
            FileEntry {
                name: "raw.bin".to_string(),
                bytes: vec![0, 159, 146, 150],
            },
        ]));
    }

    #[test]
    fn test_files_edge_cases_roundtrip() {
        roundtrip(SyncMessage::Files(vec![]));
        roundtrip(SyncMessage::Files(vec![FileEntry {
            name: "empty".to_string(),
            bytes: vec![],
        }]));
    }

    #[test]
    fn test_connection_confirm_roundtrip() {
        roundtrip(SyncMessage::ConnectionConfirm("acceptor".to_string()));
    }

    #[test]
    fn test_wire_shape() {
        let encoded = SyncMessage::Text("hi".to_string()).encode().unwrap();
        assert_eq!(encoded, r#"{"type":"text","content":"hi"}"#);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(SyncMessage::decode(r#"{"type":"bogus"}"#).is_err());
        assert!(SyncMessage::decode(r#"{"type":"bogus","content":"x"}"#).is_err());
    }

    #[test]
    fn test_malformed_payload_rejected() {
        assert!(SyncMessage::decode("not json at all").is_err());
        assert!(SyncMessage::decode(r#"{"content":"orphan"}"#).is_err());
        // Payload shape must match the tag
        assert!(SyncMessage::decode(r#"{"type":"files","content":"nope"}"#).is_err());
        assert!(SyncMessage::decode(r#"{"type":"text","content":[1,2]}"#).is_err());
    }
}
