//! Popup-side login machine.
//!
//! Drives the email/code flow against an [`IdentityProvider`] and reports
//! every step to the parent on all transport channels. The credential itself
//! is only ever sent once, in a `privy-token` message.

use crate::child_fsm::{ChildMachine, ChildMachineInput};
use crate::identity::IdentityProvider;
use crate::keys::StorageKeys;
use crate::{HandshakeConfig, HandshakeError, HandshakeResult, WindowHost};
use handshake_protocol::{
    compute_aliases, ErrorInfo, LaunchParams, PopupStatus, ProtocolMessage, SentAtClock,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};
use window_transport::{
    send_all, BroadcastTransport, DirectTransport, StorageTransport, TransportChannel,
    TransportError,
};

const CLOSED_MESSAGE: &str = "Login window closed";

/// Trim and lower-case an email, or `None` if it is not plausibly valid.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    if email.chars().any(char::is_whitespace) {
        return None;
    }
    Some(email)
}

fn status_message(status: PopupStatus) -> &'static str {
    match status {
        PopupStatus::Initializing => "Preparing login",
        PopupStatus::Prompting => "Enter your email to sign in",
        PopupStatus::SendingCode => "Sending verification code",
        PopupStatus::AwaitingCode => "Check your email for a verification code",
        PopupStatus::VerifyingCode => "Verifying code",
        PopupStatus::Sending => "Signing you in to Pett",
        PopupStatus::Completed => "Login complete. You can close this window.",
        PopupStatus::Error => "Login failed",
        PopupStatus::NoOpener => "Login window is not connected to Pett",
        PopupStatus::Closed => CLOSED_MESSAGE,
    }
}

#[derive(Default)]
struct ChildData {
    /// Normalized email the current code was issued for.
    email: Option<String>,
    message: String,
    error: Option<ErrorInfo>,
}

/// Popup-side handshake state machine.
pub struct ChildLoginMachine {
    host: WindowHost,
    identity: Arc<dyn IdentityProvider>,
    launch: LaunchParams,
    channels: Vec<Arc<dyn TransportChannel>>,
    clock: SentAtClock,
    fsm: Mutex<ChildMachine>,
    data: Mutex<ChildData>,
}

impl ChildLoginMachine {
    pub fn new(
        config: &HandshakeConfig,
        host: WindowHost,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let launch = LaunchParams::from_url(&host.window.location());
        let opener_origin = host
            .window
            .opener()
            .and_then(|opener| opener.location_origin().ok());
        let aliases = compute_aliases(
            &host.window.origin(),
            host.window.referrer().as_deref(),
            opener_origin,
        );

        let channels: Vec<Arc<dyn TransportChannel>> = vec![
            Arc::new(DirectTransport::to_opener(host.window.clone(), aliases)),
            Arc::new(BroadcastTransport::new(
                host.broadcast.clone(),
                config.broadcast_channel.clone(),
            )),
            Arc::new(StorageTransport::new(
                host.storage.clone(),
                config.storage_key.clone(),
            )),
        ];

        debug!(
            context = %launch.context,
            force_logout = launch.force_logout,
            reset_seq = ?launch.reset_seq,
            "Popup launched"
        );

        Self {
            host,
            identity,
            launch,
            channels,
            clock: SentAtClock::new(),
            fsm: Mutex::new(ChildMachine::new()),
            data: Mutex::new(ChildData::default()),
        }
    }

    pub fn status(&self) -> PopupStatus {
        PopupStatus::from(self.fsm.lock().state())
    }

    pub fn launch_params(&self) -> &LaunchParams {
        &self.launch
    }

    /// Message shown for the current status.
    pub fn message(&self) -> String {
        self.data.lock().message.clone()
    }

    pub fn last_error(&self) -> Option<ErrorInfo> {
        self.data.lock().error.clone()
    }

    fn emit(&self, message: ProtocolMessage) -> usize {
        send_all(&self.channels, &message.to_wire())
    }

    fn emit_status(&self, status: PopupStatus, error: Option<&HandshakeError>) -> usize {
        let (message, error) = match error {
            Some(err) => (err.to_string(), Some(err.to_error_info())),
            None => (status_message(status).to_string(), None),
        };
        {
            let mut data = self.data.lock();
            data.message = message.clone();
            data.error = error.clone();
        }
        self.emit(ProtocolMessage::StatusChanged {
            status,
            message,
            error,
            sent_at: self.clock.next(),
        })
    }

    /// Advance the FSM and report the new status on every channel.
    fn transition(
        &self,
        input: &ChildMachineInput,
        error: Option<&HandshakeError>,
    ) -> HandshakeResult<PopupStatus> {
        let mut fsm = self.fsm.lock();
        let old_status = PopupStatus::from(fsm.state());
        fsm.consume(input).map_err(|_| {
            HandshakeError::InvalidTransition(format!(
                "Cannot apply {:?} in popup state {:?}",
                input,
                fsm.state()
            ))
        })?;
        let new_status = PopupStatus::from(fsm.state());
        drop(fsm);

        debug!(old_status = %old_status, new_status = %new_status, "Popup state transition");
        self.emit_status(new_status, error);
        Ok(new_status)
    }

    /// Move to `error`, report it on every channel, and return `err`.
    fn fail<T>(&self, err: HandshakeError) -> HandshakeResult<T> {
        warn!(error = %err, "Popup login failed");
        if let Err(e) = self.transition(&ChildMachineInput::Failed, Some(&err)) {
            debug!(error = %e, "Failure reported outside a failable state");
        }
        self.emit(ProtocolMessage::ErrorReported {
            message: err.to_string(),
            error: Some(err.to_error_info()),
            sent_at: self.clock.next(),
        });
        Err(err)
    }

    /// Report a validation problem without leaving the current state.
    fn reject_input<T>(&self, err: HandshakeError) -> HandshakeResult<T> {
        debug!(error = %err, "Rejected popup input");
        self.emit_status(self.status(), Some(&err));
        Err(err)
    }

    fn has_live_opener(&self) -> bool {
        self.host
            .window
            .opener()
            .is_some_and(|opener| !opener.is_closed())
    }

    fn handled_reset_seq(&self) -> HandshakeResult<Option<u64>> {
        Ok(self
            .host
            .storage
            .get(StorageKeys::HANDLED_RESET_SEQ)?
            .and_then(|v| v.trim().parse().ok()))
    }

    /// Begin the popup flow.
    ///
    /// Returns `NoOpener` (not an error) when a plain browser popup has lost
    /// its opener, since nothing can be done from inside the popup.
    pub async fn start(&self) -> HandshakeResult<PopupStatus> {
        self.emit_status(PopupStatus::Initializing, None);

        if self.launch.context.expects_opener() && !self.has_live_opener() {
            let err = HandshakeError::NoOpener;
            warn!("Popup has no opener");
            let status = self.transition(&ChildMachineInput::OpenerMissing, Some(&err))?;
            self.emit(ProtocolMessage::ErrorReported {
                message: err.to_string(),
                error: Some(err.to_error_info()),
                sent_at: self.clock.next(),
            });
            return Ok(status);
        }

        let handled = match self.handled_reset_seq() {
            Ok(handled) => handled,
            Err(e) => return self.fail(e),
        };
        if self.launch.requires_logout(handled) {
            info!(reset_seq = ?self.launch.reset_seq, "Forced logout of identity session");
            if let Err(e) = self.identity.logout().await {
                return self.fail(e);
            }
            if let Some(seq) = self.launch.reset_seq {
                if let Err(e) = self
                    .host
                    .storage
                    .set(StorageKeys::HANDLED_RESET_SEQ, &seq.to_string())
                {
                    warn!(error = %e, "Failed to record handled reset sequence");
                }
            }
            return self.transition(&ChildMachineInput::Ready, None);
        }

        match self.identity.is_authenticated().await {
            Ok(true) => {
                info!("Existing identity session found");
                self.transition(&ChildMachineInput::SessionFound, None)?;
                self.deliver_token().await
            }
            Ok(false) => self.transition(&ChildMachineInput::Ready, None),
            Err(e) => self.fail(e),
        }
    }

    /// Request a one-time code for `email`.
    pub async fn submit_email(&self, email: &str) -> HandshakeResult<PopupStatus> {
        let Some(email) = normalize_email(email) else {
            return self.reject_input(HandshakeError::InvalidEmail);
        };

        self.transition(&ChildMachineInput::EmailSubmitted, None)?;
        self.data.lock().email = Some(email.clone());

        match self.identity.send_code(&email).await {
            Ok(()) => self.transition(&ChildMachineInput::CodeSent, None),
            Err(e) => self.fail(e),
        }
    }

    /// The user changed the email field while waiting for a code.
    pub fn edit_email(&self, email: &str) -> HandshakeResult<PopupStatus> {
        let status = self.status();
        if status != PopupStatus::AwaitingCode {
            return Ok(status);
        }
        let edited = email.trim().to_lowercase();
        let unchanged = self.data.lock().email.as_deref() == Some(edited.as_str());
        if unchanged {
            return Ok(status);
        }
        self.data.lock().email = None;
        self.transition(&ChildMachineInput::EmailEdited, None)
    }

    /// Verify the code and hand the credential to the parent.
    pub async fn submit_code(&self, code: &str) -> HandshakeResult<PopupStatus> {
        let code = code.trim();
        if code.is_empty() {
            return self.reject_input(HandshakeError::InvalidCode);
        }
        let Some(email) = self.data.lock().email.clone() else {
            return self.reject_input(HandshakeError::InvalidEmail);
        };

        self.transition(&ChildMachineInput::CodeSubmitted, None)?;
        if let Err(e) = self.identity.login_with_code(&email, code).await {
            return self.fail(e);
        }
        self.transition(&ChildMachineInput::CodeVerified, None)?;
        self.deliver_token().await
    }

    async fn deliver_token(&self) -> HandshakeResult<PopupStatus> {
        let token = match self.identity.access_token().await {
            Ok(Some(token)) if !token.trim().is_empty() => token,
            Ok(_) => {
                return self.fail(HandshakeError::CredentialMissing(
                    "the identity provider returned no access token".to_string(),
                ))
            }
            Err(e) => return self.fail(e),
        };

        let token_len = token.len();
        let delivered = self.emit(ProtocolMessage::TokenDelivered {
            token,
            sent_at: self.clock.next(),
        });
        if delivered == 0 {
            return self.fail(TransportError::PeerUnavailable.into());
        }
        info!(channels = delivered, token_len, "Credential handed to parent");

        let status = self.transition(&ChildMachineInput::TokenSent, None)?;
        self.host.window.close();
        Ok(status)
    }

    /// Leave `error` and prompt again.
    pub fn retry(&self) -> HandshakeResult<PopupStatus> {
        self.data.lock().email = None;
        self.transition(&ChildMachineInput::Retry, None)
    }

    /// The popup is unloading without completing.
    pub fn dismiss(&self) -> HandshakeResult<PopupStatus> {
        let status = self.status();
        if status.is_terminal() {
            return Ok(status);
        }
        let status = self.transition(&ChildMachineInput::Dismissed, None)?;
        self.emit(ProtocolMessage::Closed {
            message: Some(CLOSED_MESSAGE.to_string()),
            sent_at: self.clock.next(),
        });
        info!("Popup dismissed");
        Ok(status)
    }
}
