//! Popup-side login state machine using rust-fsm.
//!
//! ```text
//! Initializing ─► Prompting ─► SendingCode ─► AwaitingCode ─► VerifyingCode ─► Sending ─► Completed
//!      │              ▲                            │                               ▲
//!      │              └──────── EmailEdited ───────┘                               │
//!      ├─────────────────────────── SessionFound ──────────────────────────────────┘
//!      └─► NoOpener
//!
//! Failed: any non-terminal state ─► Error ─► (Retry) Prompting
//! Dismissed: any non-terminal state ─► Closed
//! ```

use handshake_protocol::PopupStatus;
use rust_fsm::*;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub child_machine(Initializing)

    Initializing => {
        Ready => Prompting,
        // Already signed in with the identity provider
        SessionFound => Sending,
        OpenerMissing => NoOpener,
        Failed => Error,
        Dismissed => Closed
    },
    Prompting => {
        EmailSubmitted => SendingCode,
        Failed => Error,
        Dismissed => Closed
    },
    SendingCode => {
        CodeSent => AwaitingCode,
        Failed => Error,
        Dismissed => Closed
    },
    AwaitingCode => {
        CodeSubmitted => VerifyingCode,
        EmailEdited => Prompting,
        // Resend
        EmailSubmitted => SendingCode,
        Failed => Error,
        Dismissed => Closed
    },
    VerifyingCode => {
        CodeVerified => Sending,
        Failed => Error,
        Dismissed => Closed
    },
    Sending => {
        TokenSent => Completed,
        Failed => Error,
        Dismissed => Closed
    },
    Error => {
        Retry => Prompting,
        Dismissed => Closed
    }
}

pub use child_machine::Input as ChildMachineInput;
pub use child_machine::State as ChildMachineState;
pub use child_machine::StateMachine as ChildMachine;

impl From<&ChildMachineState> for PopupStatus {
    fn from(state: &ChildMachineState) -> Self {
        match state {
            ChildMachineState::Initializing => PopupStatus::Initializing,
            ChildMachineState::Prompting => PopupStatus::Prompting,
            ChildMachineState::SendingCode => PopupStatus::SendingCode,
            ChildMachineState::AwaitingCode => PopupStatus::AwaitingCode,
            ChildMachineState::VerifyingCode => PopupStatus::VerifyingCode,
            ChildMachineState::Sending => PopupStatus::Sending,
            ChildMachineState::Completed => PopupStatus::Completed,
            ChildMachineState::Error => PopupStatus::Error,
            ChildMachineState::NoOpener => PopupStatus::NoOpener,
            ChildMachineState::Closed => PopupStatus::Closed,
        }
    }
}
