//! Handshake error types.

use handshake_protocol::{ErrorCode, ErrorInfo, ProtocolError};
use pett_backend::BackendError;
use thiserror::Error;
use window_transport::{HostError, TransportError};

/// Handshake error type.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// The popup could not be opened
    #[error("The login window was blocked. Please allow popups for this site and try again.")]
    TransportBlocked,

    /// A message arrived from an origin outside the alias set
    #[error("Message from untrusted origin: {0}")]
    OriginRejected(String),

    /// No credential is available where one is required
    #[error("No login credential available: {0}")]
    CredentialMissing(String),

    /// The backend refused or failed the credential exchange
    #[error("Login failed: {0}")]
    BackendExchangeFailed(String),

    /// The popup has no usable reference back to the dashboard
    #[error("This window has lost its connection to the Pett dashboard. Close it and start the login again.")]
    NoOpener,

    /// The popup went away before completing
    #[error("Login window connection lost. Please try again.")]
    PopupLost,

    /// Email input failed validation
    #[error("Please enter a valid email address")]
    InvalidEmail,

    /// Code input failed validation
    #[error("Please enter the verification code")]
    InvalidCode,

    /// Pet name input failed validation
    #[error("Please enter a name for your pet")]
    InvalidPetName,

    /// Invalid state transition in a handshake FSM
    #[error("Invalid handshake state transition: {0}")]
    InvalidTransition(String),

    /// Identity provider call failed
    #[error("{0}")]
    Identity(String),

    /// Backend client error
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Transport channel error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Host capability error
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HandshakeError {
    /// Returns true if the message is meant to be shown to the user as is.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            HandshakeError::TransportBlocked
                | HandshakeError::CredentialMissing(_)
                | HandshakeError::BackendExchangeFailed(_)
                | HandshakeError::NoOpener
                | HandshakeError::PopupLost
                | HandshakeError::InvalidEmail
                | HandshakeError::InvalidCode
                | HandshakeError::InvalidPetName
                | HandshakeError::Identity(_)
        )
    }

    /// Returns true if the user can try the same flow again.
    ///
    /// Credential and session failures always leave the system retryable.
    /// A popup with no opener must be closed and the login restarted from
    /// the dashboard.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandshakeError::NoOpener
            | HandshakeError::InvalidTransition(_)
            | HandshakeError::Config(_) => false,
            HandshakeError::Host(HostError::Closed) => false,
            _ => true,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            HandshakeError::TransportBlocked => "popup_blocked",
            HandshakeError::OriginRejected(_) => "origin_rejected",
            HandshakeError::CredentialMissing(_) => "credential_missing",
            HandshakeError::BackendExchangeFailed(_) => "backend_exchange_failed",
            HandshakeError::NoOpener => "no_opener",
            HandshakeError::PopupLost => "popup_lost",
            HandshakeError::InvalidEmail => "invalid_email",
            HandshakeError::InvalidCode => "invalid_code",
            HandshakeError::InvalidPetName => "invalid_pet_name",
            HandshakeError::InvalidTransition(_) => "invalid_transition",
            HandshakeError::Identity(_) => "identity_error",
            HandshakeError::Backend(_) => "backend_error",
            HandshakeError::Transport(_) => "transport_error",
            HandshakeError::Host(_) => "host_error",
            HandshakeError::Protocol(_) => "protocol_error",
            HandshakeError::Config(_) => "config_error",
            HandshakeError::Io(_) => "io_error",
            HandshakeError::Json(_) => "json_error",
        }
    }

    /// Wire representation for `privy-popup-error` / status messages.
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.to_string()).with_code(ErrorCode::Text(self.code().to_string()))
    }
}

/// Result type alias using HandshakeError.
pub type HandshakeResult<T> = Result<T, HandshakeError>;
