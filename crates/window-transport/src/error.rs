//! Host and transport error types.

use handshake_protocol::ProtocolError;
use thiserror::Error;

/// Failures reported by a host window capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The window behind a reference has been closed or dropped
    #[error("Window is closed")]
    Closed,

    /// Access to a cross-origin window property was denied
    #[error("Cross-origin access denied")]
    CrossOrigin,

    /// Shared storage would exceed its byte quota
    #[error("Storage quota exceeded: {needed} bytes needed, quota is {quota}")]
    QuotaExceeded { needed: usize, quota: usize },

    /// The capability is not available in this host
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias using HostError.
pub type HostResult<T> = Result<T, HostError>;

/// Failures while sending or receiving on a transport channel.
#[derive(Error, Debug)]
pub enum TransportError {
    /// No live peer window to deliver to
    #[error("No live peer window")]
    PeerUnavailable,

    /// The peer's origin matched none of the posted target origins
    #[error("Peer origin matched none of {0} target origins")]
    NoMatchingTarget(usize),

    /// Host capability failed
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// Message could not be encoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Returns true if a later send on the same channel may succeed.
    ///
    /// A closed peer never comes back; a full storage area may drain.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Host(HostError::QuotaExceeded { .. })
                | TransportError::Host(HostError::Unavailable(_))
        )
    }
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;
