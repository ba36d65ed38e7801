//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding or validating protocol data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The `type` tag is not one of the handshake message types
    #[error("Unknown message type: {0:?}")]
    UnknownType(String),

    /// A field required by the message type is absent or empty
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Status string does not name a popup status
    #[error("Unknown popup status: {0:?}")]
    UnknownStatus(String),

    /// Origin could not be derived (opaque, schemeless or hostless)
    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Result type alias using ProtocolError.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
