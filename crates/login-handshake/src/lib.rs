//! Cross-window login handshake for the Pett dashboard.
//!
//! This crate provides:
//! - `AuthSessionMachine`: the parent window's session lifecycle (restore,
//!   popup login, credential exchange, pet registration, logout)
//! - `ChildLoginMachine`: the popup's email/code flow and credential delivery
//! - `PopupController`: one popup at a time, with liveness polling
//! - `IdentityProvider`: the seam to the email/code identity vendor
//! - `HandshakeConfig`: file and environment configuration
//!
//! Both machines are explicit rust-fsm state machines and talk only through
//! the transport channels of `window-transport`.

mod child;
mod child_fsm;
mod config;
mod error;
mod host;
mod identity;
mod keys;
mod popup;
mod session;
mod session_fsm;

#[cfg(test)]
mod tests;

pub use child::{normalize_email, ChildLoginMachine};
pub use child_fsm::{ChildMachine, ChildMachineInput, ChildMachineState};
pub use config::{
    default_config_path, HandshakeConfig, DEFAULT_BACKEND_URL, DEFAULT_LIVENESS_INTERVAL_MS,
    DEFAULT_POPUP_PATH,
};
pub use error::{HandshakeError, HandshakeResult};
pub use host::WindowHost;
pub use identity::{IdentityProvider, MemoryIdentityProvider};
pub use keys::StorageKeys;
pub use popup::{PopupController, PopupEvent, PopupHandle, PopupOptions};
pub use session::{
    AuthSession, AuthSessionMachine, PopupProgress, SessionSnapshot, SessionStateCallback,
    SessionStreams,
};
pub use session_fsm::{
    SessionMachine, SessionMachineInput, SessionMachineState, SessionState,
    SessionStateChangedPayload,
};
