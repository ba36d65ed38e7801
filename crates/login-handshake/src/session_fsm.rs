//! Parent-side session state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//!                ┌─────────────┐  RestoreStarted   ┌─────────────┐
//!   (initial) ──►│  SignedOut  │──────────────────►│  Restoring  │
//!                └──────┬──────┘◄──────────────────└──────┬──────┘
//!                       │        RestoreMissing           │ RestoreFound
//!                       │ LoginRequested                  │
//!                       ▼                                 │
//!                ┌─────────────┐  PopupBlocked /          │
//!                │AwaitingPopup│  PopupDismissed ──► SignedOut
//!                └──────┬──────┘                          │
//!                       │ TokenReceived                   │
//!                       ▼                                 │
//!                ┌─────────────┐  RegistrationNeeded ┌────┴──────────────┐
//!                │ Exchanging  │────────────────────►│ NeedsRegistration │
//!                └──────┬──────┘◄────────────────────└───────────────────┘
//!                       │        RegisterSubmitted        │
//!                       │ ExchangeSucceeded               │
//!                       ▼                                 ▼
//!                ┌─────────────┐  LogoutRequested  ┌─────────────┐
//!                │  SignedIn   │──────────────────►│ SigningOut  │── LogoutComplete ──► SignedOut
//!                └─────────────┘                   └─────────────┘
//! ```
//!
//! `LogoutRequested` is accepted from every state except `SigningOut`.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(SignedOut)

    SignedOut => {
        RestoreStarted => Restoring,
        LoginRequested => AwaitingPopup,
        // A late delivery from a popup whose attempt was cancelled
        TokenReceived => Exchanging,
        LogoutRequested => SigningOut
    },
    Restoring => {
        RestoreFound => SignedIn,
        RestoreMissing => SignedOut,
        LoginRequested => AwaitingPopup,
        TokenReceived => Exchanging,
        LogoutRequested => SigningOut
    },
    AwaitingPopup => {
        // Starting over replaces the popup
        LoginRequested => AwaitingPopup,
        PopupBlocked => SignedOut,
        PopupDismissed => SignedOut,
        TokenReceived => Exchanging,
        LogoutRequested => SigningOut
    },
    Exchanging => {
        ExchangeSucceeded => SignedIn,
        RegistrationNeeded => NeedsRegistration,
        ExchangeFailed => SignedOut,
        LogoutRequested => SigningOut
    },
    NeedsRegistration => {
        RegisterSubmitted => Exchanging,
        LoginRequested => AwaitingPopup,
        TokenReceived => Exchanging,
        LogoutRequested => SigningOut
    },
    SignedIn => {
        LogoutRequested => SigningOut
    },
    SigningOut => {
        LogoutComplete => SignedOut
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Session state for UI and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    SignedOut,
    Restoring,
    AwaitingPopup,
    Exchanging,
    NeedsRegistration,
    SignedIn,
    SigningOut,
}

impl SessionState {
    /// Returns true only for `SignedIn`.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::SignedIn)
    }

    /// Returns true while an operation is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Restoring
                | SessionState::AwaitingPopup
                | SessionState::Exchanging
                | SessionState::SigningOut
        )
    }
}

impl From<&SessionMachineState> for SessionState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::SignedOut => SessionState::SignedOut,
            SessionMachineState::Restoring => SessionState::Restoring,
            SessionMachineState::AwaitingPopup => SessionState::AwaitingPopup,
            SessionMachineState::Exchanging => SessionState::Exchanging,
            SessionMachineState::NeedsRegistration => SessionState::NeedsRegistration,
            SessionMachineState::SignedIn => SessionState::SignedIn,
            SessionMachineState::SigningOut => SessionState::SigningOut,
        }
    }
}

/// Payload for session state change notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStateChangedPayload {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pet_identity: Option<String>,
}
