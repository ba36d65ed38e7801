//! Wire protocol for the cross-window login handshake.
//!
//! This crate provides:
//! - The JSON wire format shared by every transport channel
//! - The normalized `ProtocolMessage` union consumed by the parent window
//! - Origins and origin alias sets used to validate direct window messages
//! - Popup launch parameters (forced logout, reset sequence, host context)
//! - A monotonic `sentAt` clock for deduplication

mod clock;
mod error;
mod launch;
mod message;
mod origin;

pub use clock::{now_millis, SentAtClock};
pub use error::{ProtocolError, ProtocolResult};
pub use launch::{
    build_launch_url, HostContext, LaunchParams, CONTEXT_PARAM, FORCE_LOGOUT_PARAM,
    RESET_SEQ_PARAM,
};
pub use message::{
    ErrorCode, ErrorInfo, MessageKind, PopupStatus, ProtocolMessage, WireMessage,
    CLOSED_MESSAGE_TYPE, ERROR_MESSAGE_TYPE, STATUS_MESSAGE_TYPE, TOKEN_MESSAGE_TYPE,
};
pub use origin::{compute_aliases, Origin, OriginAliasSet};
