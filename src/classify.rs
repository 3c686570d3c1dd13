//! Error Classifier
//!
//! Maps transport and library errors to a closed set of user-facing codes.
//! Matching is an ordered, case-sensitive substring scan over the error's
//! display text; the first pattern found wins. Operating-system error texts
//! are capitalised ("Connection refused"), so the table carries those
//! sentence-case forms next to the lowercase library forms.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::BridgeError;

/// Stable message codes sent to the client, both errors and close reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    ConnectionClosed,
    ReadLimitExceeded,
    ConnectionTimeout,
    ConnectionRefused,
    NoRoute,
    AuthFailed,
    InvalidCredentials,
    PermissionDenied,
    HostUnreachable,
    SshServiceDown,
    NetworkError,
    ProtocolError,
    ResourceExhausted,
    UnknownError,
    SessionEnded,
    FailedToSendFingerprintMsg,
    FailedToReadFingerprint,
    FailedToParseFingerprint,
    FailedToAddFingerprint,
    UserRejectedFingerprint,
}

impl MessageCode {
    /// Wire identifier of this code.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::ConnectionClosed => "websocket.error.connection_closed",
            Self::ReadLimitExceeded => "websocket.error.read_limit_exceeded",
            Self::ConnectionTimeout => "websocket.error.connection_timeout",
            Self::ConnectionRefused => "websocket.error.connection_refused",
            Self::NoRoute => "websocket.error.no_route",
            Self::AuthFailed => "websocket.error.auth_failed",
            Self::InvalidCredentials => "websocket.error.invalid_credentials",
            Self::PermissionDenied => "websocket.error.permission_denied",
            Self::HostUnreachable => "websocket.error.host_unreachable",
            Self::SshServiceDown => "websocket.error.ssh_service_down",
            Self::NetworkError => "websocket.error.network_error",
            Self::ProtocolError => "websocket.error.protocol_error",
            Self::ResourceExhausted => "websocket.error.resource_exhausted",
            Self::UnknownError => "websocket.error.unknown_error",
            Self::SessionEnded => "websocket.info.session_ended",
            Self::FailedToSendFingerprintMsg => "websocket.error.failed_to_send_fingerprint_msg",
            Self::FailedToReadFingerprint => "websocket.error.failed_to_read_fingerprint",
            Self::FailedToParseFingerprint => "websocket.error.failed_to_parse_fingerprint",
            Self::FailedToAddFingerprint => "websocket.error.failed_to_add_fingerprint",
            Self::UserRejectedFingerprint => "websocket.info.user_rejected_fingerprint",
        }
    }

    /// Human-readable text for this code.
    #[must_use]
    pub const fn text(self) -> &'static str {
        match self {
            Self::ConnectionClosed => "Connection closed",
            Self::ReadLimitExceeded => "Connection data exceeded limit",
            Self::ConnectionTimeout => "Connection timeout",
            Self::ConnectionRefused => "Connection refused",
            Self::NoRoute => "No route to host",
            Self::AuthFailed => "Authentication failed",
            Self::InvalidCredentials => "Invalid credentials",
            Self::PermissionDenied => "Permission denied",
            Self::HostUnreachable => "Host unreachable",
            Self::SshServiceDown => "SSH service down",
            Self::NetworkError => "Network error",
            Self::ProtocolError => "Protocol error",
            Self::ResourceExhausted => "Server resources exhausted",
            Self::UnknownError => "Connection failed",
            Self::SessionEnded => "Session ended",
            Self::FailedToSendFingerprintMsg => "Failed to send fingerprint message",
            Self::FailedToReadFingerprint => "Failed to read fingerprint confirmation",
            Self::FailedToParseFingerprint => "Failed to parse fingerprint confirmation",
            Self::FailedToAddFingerprint => "Failed to add host fingerprint",
            Self::UserRejectedFingerprint => "User rejected host fingerprint",
        }
    }
}

impl std::fmt::Display for MessageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl Serialize for MessageCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}

/// Ordered pattern table, first match wins.
const PATTERNS: &[(&str, MessageCode)] = &[
    ("i/o timeout", MessageCode::ConnectionTimeout),
    ("timed out", MessageCode::ConnectionTimeout),
    ("connection refused", MessageCode::ConnectionRefused),
    ("Connection refused", MessageCode::ConnectionRefused),
    ("no route", MessageCode::NoRoute),
    ("No route", MessageCode::NoRoute),
    ("auth", MessageCode::AuthFailed),
    ("invalid credentials", MessageCode::InvalidCredentials),
    ("incorrect password", MessageCode::InvalidCredentials),
    ("wrong username", MessageCode::InvalidCredentials),
    ("permission denied", MessageCode::PermissionDenied),
    ("Permission denied", MessageCode::PermissionDenied),
    ("access denied", MessageCode::PermissionDenied),
    ("host unreachable", MessageCode::HostUnreachable),
    ("Host is unreachable", MessageCode::HostUnreachable),
    ("no such host", MessageCode::HostUnreachable),
    ("ssh service", MessageCode::SshServiceDown),
    ("port 22", MessageCode::SshServiceDown),
    ("network", MessageCode::NetworkError),
    ("Network", MessageCode::NetworkError),
    ("connection reset", MessageCode::NetworkError),
    ("Connection reset", MessageCode::NetworkError),
    ("broken pipe", MessageCode::NetworkError),
    ("Broken pipe", MessageCode::NetworkError),
    ("protocol", MessageCode::ProtocolError),
    ("incompatible", MessageCode::ProtocolError),
    ("version", MessageCode::ProtocolError),
    ("resource", MessageCode::ResourceExhausted),
    ("too many connections", MessageCode::ResourceExhausted),
    ("connection limit", MessageCode::ResourceExhausted),
];

/// Classification of one error, ready to send to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub code: MessageCode,
    pub message: &'static str,
    pub details: String,
}

/// Classify raw error text.
#[must_use]
pub fn classify_text(text: &str) -> MessageCode {
    PATTERNS
        .iter()
        .find(|(pattern, _)| text.contains(pattern))
        .map_or(MessageCode::UnknownError, |&(_, code)| code)
}

/// Classify an error. Closed and over-limit channels are recognised by
/// variant; everything else by its display text.
#[must_use]
pub fn classify(err: &BridgeError) -> Classified {
    let details = err.to_string();
    let code = match err {
        BridgeError::ChannelClosed => MessageCode::ConnectionClosed,
        BridgeError::ReadLimitExceeded { .. } => MessageCode::ReadLimitExceeded,
        _ => classify_text(&details),
    };

    if code == MessageCode::UnknownError {
        warn!(error = %details, "Unhandled error type");
    } else {
        debug!(code = %code, "Classified error");
    }

    Classified {
        code,
        message: code.text(),
        details,
    }
}
