//! Handshake messages: the JSON wire format and its normalized form.
//!
//! ## Wire format
//!
//! ```text
//! {
//!   "type":    "privy-token" | "privy-popup-status" | "privy-popup-error" | "privy-popup-closed",
//!   "token":   string?,
//!   "status":  string?,
//!   "message": string?,
//!   "error":   { "message": string, "code": string|number?, "stack": string? }?,
//!   "sentAt":  number,
//!   "id":      string?
//! }
//! ```
//!
//! Every transport carries exactly this JSON. The receiving side decodes it
//! into a [`WireMessage`] (which never fails on unknown fields) and then
//! normalizes it into a [`ProtocolMessage`]. Anything that cannot be
//! normalized is dropped by the caller.

use crate::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Wire tag for a delivered credential.
pub const TOKEN_MESSAGE_TYPE: &str = "privy-token";
/// Wire tag for popup progress updates.
pub const STATUS_MESSAGE_TYPE: &str = "privy-popup-status";
/// Wire tag for popup-side failures.
pub const ERROR_MESSAGE_TYPE: &str = "privy-popup-error";
/// Wire tag for a popup dismissed without completing.
pub const CLOSED_MESSAGE_TYPE: &str = "privy-popup-closed";

/// Logical message stream. Deduplication is tracked per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    TokenDelivered,
    StatusChanged,
    ErrorReported,
    Closed,
}

impl MessageKind {
    pub fn wire_type(self) -> &'static str {
        match self {
            MessageKind::TokenDelivered => TOKEN_MESSAGE_TYPE,
            MessageKind::StatusChanged => STATUS_MESSAGE_TYPE,
            MessageKind::ErrorReported => ERROR_MESSAGE_TYPE,
            MessageKind::Closed => CLOSED_MESSAGE_TYPE,
        }
    }

    pub fn from_wire_type(tag: &str) -> Option<Self> {
        match tag {
            TOKEN_MESSAGE_TYPE => Some(MessageKind::TokenDelivered),
            STATUS_MESSAGE_TYPE => Some(MessageKind::StatusChanged),
            ERROR_MESSAGE_TYPE => Some(MessageKind::ErrorReported),
            CLOSED_MESSAGE_TYPE => Some(MessageKind::Closed),
            _ => None,
        }
    }
}

/// Popup-side login status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PopupStatus {
    Initializing,
    Prompting,
    SendingCode,
    AwaitingCode,
    VerifyingCode,
    Sending,
    Completed,
    Error,
    NoOpener,
    Closed,
}

impl PopupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PopupStatus::Initializing => "initializing",
            PopupStatus::Prompting => "prompting",
            PopupStatus::SendingCode => "sending-code",
            PopupStatus::AwaitingCode => "awaiting-code",
            PopupStatus::VerifyingCode => "verifying-code",
            PopupStatus::Sending => "sending",
            PopupStatus::Completed => "completed",
            PopupStatus::Error => "error",
            PopupStatus::NoOpener => "no-opener",
            PopupStatus::Closed => "closed",
        }
    }

    /// Terminal statuses end the popup's participation in the handshake.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PopupStatus::Completed | PopupStatus::NoOpener | PopupStatus::Closed
        )
    }
}

impl fmt::Display for PopupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PopupStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.trim() {
            "initializing" => PopupStatus::Initializing,
            "prompting" => PopupStatus::Prompting,
            "sending-code" => PopupStatus::SendingCode,
            "awaiting-code" => PopupStatus::AwaitingCode,
            "verifying-code" => PopupStatus::VerifyingCode,
            "sending" => PopupStatus::Sending,
            "completed" => PopupStatus::Completed,
            "error" => PopupStatus::Error,
            "no-opener" => PopupStatus::NoOpener,
            "closed" => PopupStatus::Closed,
            other => return Err(ProtocolError::UnknownStatus(other.to_string())),
        };
        Ok(status)
    }
}

/// Error code as sent by the identity vendor: either numeric or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Number(i64),
    Text(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Number(n) => write!(f, "{}", n),
            ErrorCode::Text(s) => f.write_str(s),
        }
    }
}

/// Structured error detail carried by status and error messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            stack: None,
        }
    }

    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }
}

/// Raw handshake message as it travels between windows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_error_info",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<ErrorInfo>,
    #[serde(
        default,
        deserialize_with = "deserialize_sent_at",
        skip_serializing_if = "Option::is_none"
    )]
    pub sent_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl WireMessage {
    /// Decode a JSON payload. Unknown fields are ignored.
    pub fn decode(data: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Decode an already-parsed JSON value (e.g. a structured-clone payload).
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Attach an explicit idempotency key.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// JS senders use `Date.now()`, but some hosts serialize numbers as floats or strings.
fn deserialize_sent_at<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

/// Accept either an error object or a bare error string.
fn deserialize_error_info<'de, D>(deserializer: D) -> Result<Option<ErrorInfo>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(message) => Some(ErrorInfo::new(message)),
        Value::Object(_) => serde_json::from_value(v).ok(),
        _ => None,
    }))
}

/// Normalized handshake message.
#[derive(Clone, PartialEq, Eq)]
pub enum ProtocolMessage {
    /// The popup obtained a credential.
    TokenDelivered { token: String, sent_at: u64 },
    /// Popup progress update.
    StatusChanged {
        status: PopupStatus,
        message: String,
        error: Option<ErrorInfo>,
        sent_at: u64,
    },
    /// Popup-side failure.
    ErrorReported {
        message: String,
        error: Option<ErrorInfo>,
        sent_at: u64,
    },
    /// The popup was dismissed without completing.
    Closed {
        message: Option<String>,
        sent_at: u64,
    },
}

impl ProtocolMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ProtocolMessage::TokenDelivered { .. } => MessageKind::TokenDelivered,
            ProtocolMessage::StatusChanged { .. } => MessageKind::StatusChanged,
            ProtocolMessage::ErrorReported { .. } => MessageKind::ErrorReported,
            ProtocolMessage::Closed { .. } => MessageKind::Closed,
        }
    }

    pub fn sent_at(&self) -> u64 {
        match self {
            ProtocolMessage::TokenDelivered { sent_at, .. }
            | ProtocolMessage::StatusChanged { sent_at, .. }
            | ProtocolMessage::ErrorReported { sent_at, .. }
            | ProtocolMessage::Closed { sent_at, .. } => *sent_at,
        }
    }

    /// Normalize a wire message.
    ///
    /// Fails for unknown tags, a missing `sentAt`, an empty token, or an
    /// unknown status. Callers drop failures; they never propagate.
    pub fn from_wire(wire: &WireMessage) -> ProtocolResult<Self> {
        let kind = MessageKind::from_wire_type(wire.kind.trim())
            .ok_or_else(|| ProtocolError::UnknownType(wire.kind.clone()))?;
        let sent_at = wire.sent_at.ok_or(ProtocolError::MissingField("sentAt"))?;

        let message = match kind {
            MessageKind::TokenDelivered => {
                let token = wire
                    .token
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or(ProtocolError::MissingField("token"))?;
                ProtocolMessage::TokenDelivered {
                    token: token.to_string(),
                    sent_at,
                }
            }
            MessageKind::StatusChanged => {
                let status = wire
                    .status
                    .as_deref()
                    .ok_or(ProtocolError::MissingField("status"))?
                    .parse()?;
                ProtocolMessage::StatusChanged {
                    status,
                    message: wire.message.clone().unwrap_or_default(),
                    error: wire.error.clone(),
                    sent_at,
                }
            }
            MessageKind::ErrorReported => ProtocolMessage::ErrorReported {
                message: wire
                    .message
                    .clone()
                    .or_else(|| wire.error.as_ref().map(|e| e.message.clone()))
                    .unwrap_or_default(),
                error: wire.error.clone(),
                sent_at,
            },
            MessageKind::Closed => ProtocolMessage::Closed {
                message: wire.message.clone(),
                sent_at,
            },
        };

        Ok(message)
    }

    pub fn to_wire(&self) -> WireMessage {
        let mut wire = WireMessage {
            kind: self.kind().wire_type().to_string(),
            sent_at: Some(self.sent_at()),
            ..Default::default()
        };

        match self {
            ProtocolMessage::TokenDelivered { token, .. } => {
                wire.token = Some(token.clone());
            }
            ProtocolMessage::StatusChanged {
                status,
                message,
                error,
                ..
            } => {
                wire.status = Some(status.as_str().to_string());
                wire.message = Some(message.clone());
                wire.error = error.clone();
            }
            ProtocolMessage::ErrorReported { message, error, .. } => {
                wire.message = Some(message.clone());
                wire.error = error.clone();
            }
            ProtocolMessage::Closed { message, .. } => {
                wire.message = message.clone();
            }
        }

        wire
    }
}

impl TryFrom<&WireMessage> for ProtocolMessage {
    type Error = ProtocolError;

    fn try_from(wire: &WireMessage) -> Result<Self, Self::Error> {
        ProtocolMessage::from_wire(wire)
    }
}

// Tokens never reach Debug output.
impl fmt::Debug for ProtocolMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolMessage::TokenDelivered { token, sent_at } => f
                .debug_struct("TokenDelivered")
                .field("token_len", &token.len())
                .field("sent_at", sent_at)
                .finish(),
            ProtocolMessage::StatusChanged {
                status,
                message,
                error,
                sent_at,
            } => f
                .debug_struct("StatusChanged")
                .field("status", status)
                .field("message", message)
                .field("error", error)
                .field("sent_at", sent_at)
                .finish(),
            ProtocolMessage::ErrorReported {
                message,
                error,
                sent_at,
            } => f
                .debug_struct("ErrorReported")
                .field("message", message)
                .field("error", error)
                .field("sent_at", sent_at)
                .finish(),
            ProtocolMessage::Closed { message, sent_at } => f
                .debug_struct("Closed")
                .field("message", message)
                .field("sent_at", sent_at)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_token_message() {
        let wire = WireMessage::decode(r#"{"type":"privy-token","token":"abc","sentAt":1000}"#)
            .unwrap();
        let msg = ProtocolMessage::from_wire(&wire).unwrap();
        assert_eq!(
            msg,
            ProtocolMessage::TokenDelivered {
                token: "abc".to_string(),
                sent_at: 1000
            }
        );
        assert_eq!(msg.kind(), MessageKind::TokenDelivered);
    }

    #[test]
    fn test_unknown_type_is_rejected_not_panicking() {
        let wire = WireMessage::decode(r#"{"type":"webpack-ok","sentAt":1}"#).unwrap();
        assert!(matches!(
            ProtocolMessage::from_wire(&wire),
            Err(ProtocolError::UnknownType(_))
        ));

        // No type at all still decodes at the wire level.
        let wire = WireMessage::decode(r#"{"hello":"world"}"#).unwrap();
        assert!(ProtocolMessage::from_wire(&wire).is_err());
    }

    #[test]
    fn test_missing_sent_at_is_rejected() {
        let wire = WireMessage::decode(r#"{"type":"privy-token","token":"abc"}"#).unwrap();
        assert!(matches!(
            ProtocolMessage::from_wire(&wire),
            Err(ProtocolError::MissingField("sentAt"))
        ));
    }

    #[test]
    fn test_blank_token_is_rejected() {
        let wire =
            WireMessage::decode(r#"{"type":"privy-token","token":"  ","sentAt":5}"#).unwrap();
        assert!(matches!(
            ProtocolMessage::from_wire(&wire),
            Err(ProtocolError::MissingField("token"))
        ));
    }

    #[test]
    fn test_sent_at_accepts_float_and_string() {
        let wire = WireMessage::decode(r#"{"type":"privy-popup-closed","sentAt":1700.9}"#).unwrap();
        assert_eq!(wire.sent_at, Some(1700));
        let wire =
            WireMessage::decode(r#"{"type":"privy-popup-closed","sentAt":"1701"}"#).unwrap();
        assert_eq!(wire.sent_at, Some(1701));
        let wire = WireMessage::decode(r#"{"type":"privy-popup-closed","sentAt":-3}"#).unwrap();
        assert_eq!(wire.sent_at, None);
    }

    #[test]
    fn test_status_message_with_error_object() {
        let wire = WireMessage::decode(
            r#"{"type":"privy-popup-status","status":"error","message":"Code expired",
                "error":{"message":"expired","code":410},"sentAt":42}"#,
        )
        .unwrap();
        match ProtocolMessage::from_wire(&wire).unwrap() {
            ProtocolMessage::StatusChanged {
                status,
                message,
                error,
                sent_at,
            } => {
                assert_eq!(status, PopupStatus::Error);
                assert_eq!(message, "Code expired");
                let error = error.unwrap();
                assert_eq!(error.code, Some(ErrorCode::Number(410)));
                assert_eq!(sent_at, 42);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let wire =
            WireMessage::decode(r#"{"type":"privy-popup-status","status":"dancing","sentAt":1}"#)
                .unwrap();
        assert!(matches!(
            ProtocolMessage::from_wire(&wire),
            Err(ProtocolError::UnknownStatus(_))
        ));
    }

    #[test]
    fn test_error_string_is_accepted_as_error_info() {
        let wire = WireMessage::decode(
            r#"{"type":"privy-popup-error","error":"network down","sentAt":9}"#,
        )
        .unwrap();
        match ProtocolMessage::from_wire(&wire).unwrap() {
            ProtocolMessage::ErrorReported { message, error, .. } => {
                assert_eq!(message, "network down");
                assert_eq!(error, Some(ErrorInfo::new("network down")));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_encoded_message_uses_wire_names() {
        let msg = ProtocolMessage::StatusChanged {
            status: PopupStatus::AwaitingCode,
            message: "Check your inbox".to_string(),
            error: Some(ErrorInfo::new("x").with_code(ErrorCode::Text("E1".to_string()))),
            sent_at: 77,
        };
        let json = msg.to_wire().encode().unwrap();
        assert!(json.contains("\"type\":\"privy-popup-status\""));
        assert!(json.contains("\"status\":\"awaiting-code\""));
        assert!(json.contains("\"sentAt\":77"));
        assert!(json.contains("\"code\":\"E1\""));
        assert!(!json.contains("\"token\""));
    }

    #[test]
    fn test_debug_never_prints_token() {
        let msg = ProtocolMessage::TokenDelivered {
            token: "super-secret-token".to_string(),
            sent_at: 1,
        };
        let debug = format!("{:?}", msg);
        assert!(!debug.contains("super-secret-token"));
        assert!(debug.contains("token_len"));
    }

    #[test]
    fn test_popup_status_parse_and_terminal() {
        for status in [
            PopupStatus::Initializing,
            PopupStatus::Prompting,
            PopupStatus::SendingCode,
            PopupStatus::AwaitingCode,
            PopupStatus::VerifyingCode,
            PopupStatus::Sending,
            PopupStatus::Completed,
            PopupStatus::Error,
            PopupStatus::NoOpener,
            PopupStatus::Closed,
        ] {
            assert_eq!(status.as_str().parse::<PopupStatus>().unwrap(), status);
        }
        assert!(PopupStatus::Completed.is_terminal());
        assert!(PopupStatus::NoOpener.is_terminal());
        assert!(!PopupStatus::Error.is_terminal());
    }
}
