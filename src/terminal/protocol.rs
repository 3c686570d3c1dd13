//! Duplex session protocol
//!
//! JSON messages exchanged with the client. Inbound messages are parsed
//! leniently: unknown types and malformed payloads are ignored by the
//! adapters, except during the fingerprint handshake where a malformed
//! reply ends the session.

use serde::{Deserialize, Serialize};

use crate::classify::{Classified, MessageCode};

pub const TYPE_RESIZE: &str = "resize";
pub const TYPE_COMMAND: &str = "cmd";
pub const TYPE_FINGERPRINT_CONFIRM: &str = "fingerprint-confirm";

/// Raw inbound payload, every field optional.
#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    cmd: String,
    #[serde(default)]
    cols: i64,
    #[serde(default)]
    rows: i64,
    #[serde(default)]
    accept: bool,
}

/// Client to engine message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Resize { cols: u32, rows: u32 },
    Command(String),
    FingerprintConfirm { accept: bool },
}

impl ClientMessage {
    /// Parse one inbound message. Returns `None` for malformed JSON, unknown
    /// types and resize requests without a positive geometry.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let payload: Payload = serde_json::from_str(text).ok()?;
        match payload.kind.as_str() {
            TYPE_RESIZE => {
                let cols = u32::try_from(payload.cols).ok().filter(|c| *c > 0)?;
                let rows = u32::try_from(payload.rows).ok().filter(|r| *r > 0)?;
                Some(Self::Resize { cols, rows })
            }
            TYPE_COMMAND => Some(Self::Command(payload.cmd)),
            TYPE_FINGERPRINT_CONFIRM => Some(Self::FingerprintConfirm {
                accept: payload.accept,
            }),
            _ => None,
        }
    }
}

/// Parse the reply to a fingerprint prompt.
///
/// Returns `Ok(true)` only for a `fingerprint-confirm` message with
/// `accept: true`; any other well-formed JSON object is a rejection.
///
/// # Errors
///
/// Returns the JSON error if the reply is not a JSON object.
pub fn parse_fingerprint_reply(text: &str) -> Result<bool, serde_json::Error> {
    let payload: Payload = serde_json::from_str(text)?;
    Ok(payload.kind == TYPE_FINGERPRINT_CONFIRM && payload.accept)
}

/// Engine to client message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Data {
        content: String,
    },
    Connected,
    FingerprintConfirm {
        host: String,
        fingerprint: String,
    },
    Error {
        message: String,
        code: MessageCode,
        details: String,
    },
}

impl ServerMessage {
    #[must_use]
    pub fn data(content: impl Into<String>) -> Self {
        Self::Data {
            content: content.into(),
        }
    }

    /// Serialize to one JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns the serialization error, which cannot happen for these
    /// plain string payloads in practice.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<Classified> for ServerMessage {
    fn from(c: Classified) -> Self {
        Self::Error {
            message: c.message.to_string(),
            code: c.code,
            details: c.details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_parse_resize() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"resize","cols":120,"rows":40}"#),
            Some(ClientMessage::Resize {
                cols: 120,
                rows: 40
            })
        );
    }

    #[test]
    fn test_resize_without_geometry_ignored() {
        assert_eq!(ClientMessage::parse(r#"{"type":"resize","cols":0,"rows":0}"#), None);
        assert_eq!(ClientMessage::parse(r#"{"type":"resize","cols":-1,"rows":40}"#), None);
        assert_eq!(ClientMessage::parse(r#"{"type":"resize","cols":80}"#), None);
    }

    #[test]
    fn test_parse_command_keeps_raw_bytes() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"cmd","cmd":"ls -la\r"}"#),
            Some(ClientMessage::Command("ls -la\r".to_string()))
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"cmd","cmd":"\u0003"}"#),
            Some(ClientMessage::Command("\u{3}".to_string()))
        );
    }

    #[test]
    fn test_parse_ignores_garbage() {
        assert_eq!(ClientMessage::parse("not json"), None);
        assert_eq!(ClientMessage::parse(r#"{"type":"ping"}"#), None);
        assert_eq!(ClientMessage::parse(r"{}"), None);
    }

    #[test]
    fn test_fingerprint_reply() {
        assert!(parse_fingerprint_reply(r#"{"type":"fingerprint-confirm","accept":true}"#).unwrap());
        assert!(!parse_fingerprint_reply(r#"{"type":"fingerprint-confirm","accept":false}"#).unwrap());
        assert!(!parse_fingerprint_reply(r#"{"type":"cmd","accept":true}"#).unwrap());
        assert!(parse_fingerprint_reply("{accept").is_err());
    }

    #[test]
    fn test_server_message_shapes() {
        let v: Value = serde_json::from_str(&ServerMessage::data("hi").to_json().unwrap()).unwrap();
        assert_eq!(v, json!({"type": "data", "content": "hi"}));

        let v: Value = serde_json::from_str(&ServerMessage::Connected.to_json().unwrap()).unwrap();
        assert_eq!(v, json!({"type": "connected"}));

        let msg = ServerMessage::FingerprintConfirm {
            host: "10.0.0.5:22".to_string(),
            fingerprint: "SHA256:abc".to_string(),
        };
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            v,
            json!({"type": "fingerprint-confirm", "host": "10.0.0.5:22", "fingerprint": "SHA256:abc"})
        );
    }

    #[test]
    fn test_error_message_from_classification() {
        let msg: ServerMessage = crate::classify::classify(&crate::error::BridgeError::ChannelClosed).into();
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["code"], "websocket.error.connection_closed");
        assert_eq!(v["message"], "Connection closed");
    }
}
