//! Parent-side session machine.
//!
//! Owns the login popup, listens on every transport channel through one
//! [`MessageBroker`], exchanges delivered credentials with the backend and
//! keeps the resulting [`AuthSession`].
//!
//! ## Reset sequence
//!
//! Every logout increments a persisted reset sequence and marks a forced
//! logout as pending. Until the next successful sign-in, each popup is
//! launched with `forceLogout=1&resetSeq=<n>` so it drops any identity
//! session left over from before the logout.

use crate::keys::StorageKeys;
use crate::popup::{PopupController, PopupEvent, PopupHandle, PopupOptions};
use crate::session_fsm::{
    SessionMachine, SessionMachineInput, SessionState, SessionStateChangedPayload,
};
use crate::{HandshakeConfig, HandshakeError, HandshakeResult, WindowHost};
use handshake_protocol::{
    build_launch_url, compute_aliases, ErrorInfo, LaunchParams, PopupStatus, ProtocolMessage,
};
use parking_lot::Mutex;
use pett_backend::{BackendClient, BackendResult, LoginResponse};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use window_transport::{
    BroadcastTransport, DirectTransport, MessageBroker, StorageTransport, TransportChannel,
};

/// Session state owned by the parent window.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthSession {
    pub session_token: Option<String>,
    pub pet_identity: Option<String>,
    pub authenticated: bool,
    pub last_error: Option<String>,
    pub requires_registration: bool,
}

// Tokens never reach Debug output.
impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field(
                "session_token_len",
                &self.session_token.as_ref().map(|t| t.len()),
            )
            .field("pet_identity", &self.pet_identity)
            .field("authenticated", &self.authenticated)
            .field("last_error", &self.last_error)
            .field("requires_registration", &self.requires_registration)
            .finish()
    }
}

/// Latest progress reported by the popup, for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PopupProgress {
    pub status: Option<PopupStatus>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Read-only view of the machine, safe to serialize and log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pet_identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub requires_registration: bool,
    pub logging_in: bool,
    pub progress: PopupProgress,
    pub reset_seq: u64,
    pub force_logout_pending: bool,
}

/// Callback type for session state changes.
pub type SessionStateCallback = Box<dyn Fn(SessionStateChangedPayload) + Send + Sync>;

/// Inbound event streams of one [`AuthSessionMachine`].
pub struct SessionStreams {
    pub messages: mpsc::UnboundedReceiver<ProtocolMessage>,
    pub popup_events: mpsc::UnboundedReceiver<PopupEvent>,
}

#[derive(Default)]
struct SessionData {
    session: AuthSession,
    progress: PopupProgress,
    logging_in: bool,
    reset_seq: u64,
    force_logout_pending: bool,
}

/// Parent-side handshake state machine.
pub struct AuthSessionMachine {
    config: HandshakeConfig,
    host: WindowHost,
    backend: Arc<dyn BackendClient>,
    broker: MessageBroker,
    /// Kept alive for the lifetime of the machine.
    _channels: Vec<Arc<dyn TransportChannel>>,
    popups: PopupController,
    popup_events: mpsc::UnboundedSender<PopupEvent>,
    fsm: Mutex<SessionMachine>,
    data: Mutex<SessionData>,
    /// Bumped by logout so in-flight exchanges from older attempts are discarded.
    generation: AtomicU64,
    state_callback: Mutex<Option<SessionStateCallback>>,
}

impl AuthSessionMachine {
    /// Wire up channels, broker and popup controller for `host`.
    pub fn new(
        config: HandshakeConfig,
        host: WindowHost,
        backend: Arc<dyn BackendClient>,
    ) -> HandshakeResult<(Self, SessionStreams)> {
        config.validate()?;
        let origin = host.window.origin();
        let opener_origin = host
            .window
            .opener()
            .and_then(|opener| opener.location_origin().ok());
        let aliases = compute_aliases(&origin, host.window.referrer().as_deref(), opener_origin);
        debug!(
            origin = %origin,
            aliases = aliases.len(),
            "Computed parent origin aliases"
        );

        let (broker, messages) = MessageBroker::new(aliases.clone());
        let channels: Vec<Arc<dyn TransportChannel>> = vec![
            // Receive-only: the parent never posts to the popup.
            Arc::new(DirectTransport::new(host.window.clone(), aliases)),
            Arc::new(BroadcastTransport::new(
                host.broadcast.clone(),
                config.broadcast_channel.clone(),
            )),
            Arc::new(StorageTransport::new(
                host.storage.clone(),
                config.storage_key.clone(),
            )),
        ];
        for channel in &channels {
            broker.attach(channel.as_ref())?;
        }

        let reset_seq = host
            .storage
            .get(StorageKeys::RESET_SEQ)?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        let force_logout_pending = host
            .storage
            .get(StorageKeys::FORCE_LOGOUT_PENDING)?
            .is_some_and(|v| v == "1");

        let popups = PopupController::new(
            host.window.clone(),
            PopupOptions::from(&config),
            config.liveness_interval(),
        );
        let (popup_tx, popup_events) = mpsc::unbounded_channel();

        info!(
            origin = %origin,
            reset_seq,
            force_logout_pending,
            "Session machine ready"
        );

        let machine = Self {
            config,
            host,
            backend,
            broker,
            _channels: channels,
            popups,
            popup_events: popup_tx,
            fsm: Mutex::new(SessionMachine::new()),
            data: Mutex::new(SessionData {
                reset_seq,
                force_logout_pending,
                ..Default::default()
            }),
            generation: AtomicU64::new(0),
            state_callback: Mutex::new(None),
        };
        Ok((
            machine,
            SessionStreams {
                messages,
                popup_events,
            },
        ))
    }

    /// Set a callback to be notified of state changes.
    pub fn set_state_callback(&self, callback: SessionStateCallback) {
        *self.state_callback.lock() = Some(callback);
    }

    pub fn state(&self) -> SessionState {
        SessionState::from(self.fsm.lock().state())
    }

    pub fn session(&self) -> AuthSession {
        self.data.lock().session.clone()
    }

    pub fn progress(&self) -> PopupProgress {
        self.data.lock().progress.clone()
    }

    pub fn is_logging_in(&self) -> bool {
        self.data.lock().logging_in
    }

    pub fn reset_seq(&self) -> u64 {
        self.data.lock().reset_seq
    }

    pub fn active_popup(&self) -> Option<PopupHandle> {
        self.popups.active()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        let data = self.data.lock();
        SessionSnapshot {
            state,
            authenticated: data.session.authenticated,
            pet_identity: data.session.pet_identity.clone(),
            last_error: data.session.last_error.clone(),
            requires_registration: data.session.requires_registration,
            logging_in: data.logging_in,
            progress: data.progress.clone(),
            reset_seq: data.reset_seq,
            force_logout_pending: data.force_logout_pending,
        }
    }

    /// Transition the FSM and notify the callback if the state changed.
    fn transition(&self, input: &SessionMachineInput) -> HandshakeResult<SessionState> {
        let mut fsm = self.fsm.lock();
        let old_state = SessionState::from(fsm.state());

        fsm.consume(input).map_err(|_| {
            HandshakeError::InvalidTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                fsm.state()
            ))
        })?;

        let new_state = SessionState::from(fsm.state());
        drop(fsm);

        if old_state != new_state {
            debug!(
                old_state = ?old_state,
                new_state = ?new_state,
                "Session state transition"
            );
            self.notify_state_change(new_state);
        }

        Ok(new_state)
    }

    fn notify_state_change(&self, state: SessionState) {
        let pet_identity = self.data.lock().session.pet_identity.clone();
        let cb = self.state_callback.lock();
        if let Some(callback) = cb.as_ref() {
            callback(SessionStateChangedPayload {
                state,
                pet_identity,
            });
        }
    }

    /// Check once whether the backend already holds a session.
    ///
    /// Only runs from `SignedOut`. A result that arrives after the user has
    /// moved on (started a login, logged out) is discarded.
    pub async fn restore(&self) -> HandshakeResult<SessionState> {
        if self.state() != SessionState::SignedOut {
            debug!(state = ?self.state(), "Skipping restore");
            return Ok(self.state());
        }
        let generation = self.generation.load(Ordering::SeqCst);
        self.transition(&SessionMachineInput::RestoreStarted)?;

        let report = match self.backend.health().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Session restore failed");
                None
            }
        };

        if self.generation.load(Ordering::SeqCst) != generation
            || self.state() != SessionState::Restoring
        {
            debug!("Discarding superseded restore result");
            return Ok(self.state());
        }

        match report.filter(|r| r.is_authenticated()) {
            Some(report) => {
                let pet_identity = report.pet_name().map(str::to_string);
                info!(pet_identity = ?pet_identity, "Restored backend session");
                self.data.lock().session = AuthSession {
                    pet_identity,
                    authenticated: true,
                    ..Default::default()
                };
                self.transition(&SessionMachineInput::RestoreFound)
            }
            None => self.transition(&SessionMachineInput::RestoreMissing),
        }
    }

    /// Open the login popup.
    ///
    /// Fails with [`HandshakeError::TransportBlocked`] when the host blocks
    /// the popup; the machine is then back in `SignedOut` and not logging in.
    pub fn login(&self) -> HandshakeResult<PopupHandle> {
        let state = self.state();
        if state == SessionState::SignedIn {
            return Err(HandshakeError::InvalidTransition(
                "Already signed in".to_string(),
            ));
        }

        let params = {
            let data = self.data.lock();
            LaunchParams {
                force_logout: data.force_logout_pending,
                reset_seq: data.force_logout_pending.then_some(data.reset_seq),
                context: self.config.host_context,
            }
        };
        let base = self.config.popup_url(&self.host.window.origin())?;
        let url = build_launch_url(&base, &params);

        self.transition(&SessionMachineInput::LoginRequested)?;
        self.broker.reset();
        {
            let mut data = self.data.lock();
            data.progress = PopupProgress::default();
            data.session.last_error = None;
            data.session.session_token = None;
            data.session.requires_registration = false;
        }

        match self.popups.open(&url) {
            Some(handle) => {
                self.data.lock().logging_in = true;
                self.popups.watch(&handle, self.popup_events.clone());
                info!(
                    popup = %handle.name(),
                    force_logout = params.force_logout,
                    reset_seq = ?params.reset_seq,
                    "Login started"
                );
                Ok(handle)
            }
            None => {
                let err = HandshakeError::TransportBlocked;
                {
                    let mut data = self.data.lock();
                    data.logging_in = false;
                    data.session.last_error = Some(err.to_string());
                }
                self.transition(&SessionMachineInput::PopupBlocked)?;
                Err(err)
            }
        }
    }

    /// Apply one normalized message from the broker.
    pub async fn handle_message(&self, message: ProtocolMessage) -> HandshakeResult<()> {
        match message {
            ProtocolMessage::TokenDelivered { token, sent_at } => {
                debug!(sent_at, token_len = token.len(), "Credential delivered");
                self.exchange(token).await?;
            }
            ProtocolMessage::StatusChanged {
                status,
                message,
                error,
                ..
            } => {
                debug!(status = %status, "Popup status");
                let mut data = self.data.lock();
                data.progress = PopupProgress {
                    status: Some(status),
                    message,
                    error,
                };
            }
            ProtocolMessage::ErrorReported { message, error, .. } => {
                warn!(message = %message, "Popup reported an error");
                let mut data = self.data.lock();
                data.progress.status = Some(PopupStatus::Error);
                data.progress.message = message;
                data.progress.error = error;
            }
            ProtocolMessage::Closed { message, .. } => {
                {
                    let mut data = self.data.lock();
                    data.logging_in = false;
                    data.progress.status = Some(PopupStatus::Closed);
                    if let Some(message) = message {
                        data.progress.message = message;
                    }
                }
                if self.state() == SessionState::AwaitingPopup {
                    self.transition(&SessionMachineInput::PopupDismissed)?;
                }
                info!("Popup dismissed");
            }
        }
        Ok(())
    }

    /// Apply one liveness event from the popup watcher.
    pub fn handle_popup_event(&self, event: PopupEvent) -> HandshakeResult<()> {
        let PopupEvent::Closed { popup_name } = event;

        let is_current = self
            .popups
            .active()
            .is_some_and(|handle| handle.name() == popup_name);
        if !is_current {
            debug!(popup = %popup_name, "Ignoring closure of a stale popup");
            return Ok(());
        }
        self.popups.forget(&popup_name);

        if self.state() != SessionState::AwaitingPopup {
            return Ok(());
        }

        {
            let mut data = self.data.lock();
            data.logging_in = false;
            if data.progress.status.is_none() {
                let err = HandshakeError::PopupLost;
                data.progress.message = err.to_string();
                data.progress.error = Some(err.to_error_info());
            }
        }
        info!(popup = %popup_name, "Popup closed before completing");
        self.transition(&SessionMachineInput::PopupDismissed)?;
        Ok(())
    }

    /// Exchange a delivered credential with the backend.
    pub async fn exchange(&self, token: String) -> HandshakeResult<SessionState> {
        let state = self.state();
        match state {
            SessionState::SignedIn => {
                debug!("Ignoring credential, already signed in");
                return Ok(state);
            }
            SessionState::Exchanging | SessionState::SigningOut => {
                debug!(state = ?state, "Ignoring credential while busy");
                return Ok(state);
            }
            _ => {}
        }

        let generation = self.generation.load(Ordering::SeqCst);
        self.transition(&SessionMachineInput::TokenReceived)?;
        let result = self.backend.exchange_token(&token).await;
        self.apply_login_result(generation, token, result, None)
    }

    /// Register a pet for the pending credential and sign in.
    pub async fn register_pet(&self, pet_name: &str) -> HandshakeResult<SessionState> {
        let pet_name = pet_name.trim();
        if pet_name.is_empty() {
            return Err(HandshakeError::InvalidPetName);
        }
        if self.state() != SessionState::NeedsRegistration {
            return Err(HandshakeError::InvalidTransition(format!(
                "Cannot register a pet in state {:?}",
                self.state()
            )));
        }
        let token = self.data.lock().session.session_token.clone().ok_or_else(|| {
            HandshakeError::CredentialMissing("no credential awaiting registration".to_string())
        })?;

        let generation = self.generation.load(Ordering::SeqCst);
        self.transition(&SessionMachineInput::RegisterSubmitted)?;
        let result = self.backend.register_pet(&token, pet_name).await;
        self.apply_login_result(generation, token, result, Some(pet_name))
    }

    fn apply_login_result(
        &self,
        generation: u64,
        token: String,
        result: BackendResult<LoginResponse>,
        registering: Option<&str>,
    ) -> HandshakeResult<SessionState> {
        if self.generation.load(Ordering::SeqCst) != generation
            || self.state() != SessionState::Exchanging
        {
            debug!("Discarding superseded exchange result");
            return Ok(self.state());
        }

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Credential exchange failed");
                return self.fail_exchange(e.to_string());
            }
        };

        if response.needs_registration() {
            info!("Credential is valid but no pet is registered");
            {
                let mut data = self.data.lock();
                data.logging_in = false;
                data.session = AuthSession {
                    session_token: Some(token),
                    requires_registration: true,
                    last_error: registering
                        .and(response.error_message())
                        .map(str::to_string),
                    ..Default::default()
                };
            }
            self.popups.close_active();
            return self.transition(&SessionMachineInput::RegistrationNeeded);
        }

        if response.success {
            let pet_identity = response
                .pet_identity()
                .or(registering)
                .map(str::to_string);
            return self.complete_sign_in(token, pet_identity);
        }

        let message = response.error_message().unwrap_or("Login failed").to_string();
        self.fail_exchange(message)
    }

    fn complete_sign_in(
        &self,
        token: String,
        pet_identity: Option<String>,
    ) -> HandshakeResult<SessionState> {
        {
            let mut data = self.data.lock();
            data.session = AuthSession {
                session_token: Some(token),
                pet_identity: pet_identity.clone(),
                authenticated: true,
                last_error: None,
                requires_registration: false,
            };
            data.logging_in = false;
            data.progress.status = Some(PopupStatus::Completed);
            data.progress.error = None;
            data.force_logout_pending = false;
        }
        if let Err(e) = self.host.storage.delete(StorageKeys::FORCE_LOGOUT_PENDING) {
            warn!(error = %e, "Failed to clear pending forced logout");
        }
        self.popups.close_active();

        info!(pet_identity = ?pet_identity, "Signed in");
        self.transition(&SessionMachineInput::ExchangeSucceeded)
    }

    fn fail_exchange(&self, message: String) -> HandshakeResult<SessionState> {
        let err = HandshakeError::BackendExchangeFailed(message);
        {
            let mut data = self.data.lock();
            data.logging_in = false;
            data.session = AuthSession {
                last_error: Some(err.to_string()),
                ..Default::default()
            };
        }
        self.popups.close_active();
        self.transition(&SessionMachineInput::ExchangeFailed)?;
        Err(err)
    }

    /// Sign out everywhere this machine can reach.
    ///
    /// Backend logout is best-effort. Calling this while signed out still
    /// clears storage and advances the reset sequence, and never fails.
    pub async fn logout(&self) -> HandshakeResult<SessionState> {
        if self.state() == SessionState::SigningOut {
            return Ok(SessionState::SigningOut);
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.transition(&SessionMachineInput::LogoutRequested)?;
        self.popups.close_active();

        if let Err(e) = self.backend.logout().await {
            warn!(error = %e, "Backend logout failed, continuing");
        }

        let cleared = self.clear_auth_storage();
        let reset_seq = {
            let mut data = self.data.lock();
            data.session = AuthSession::default();
            data.progress = PopupProgress::default();
            data.logging_in = false;
            data.reset_seq += 1;
            data.force_logout_pending = true;
            data.reset_seq
        };
        self.persist(StorageKeys::RESET_SEQ, &reset_seq.to_string());
        self.persist(StorageKeys::FORCE_LOGOUT_PENDING, "1");

        info!(reset_seq, cleared_keys = cleared, "Signed out");
        self.transition(&SessionMachineInput::LogoutComplete)
    }

    fn clear_auth_storage(&self) -> usize {
        let mut cleared = 0;
        for prefix in &self.config.auth_storage_prefixes {
            let keys = match self.host.storage.list_keys_with_prefix(prefix) {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(prefix = %prefix, error = %e, "Failed to list auth storage keys");
                    continue;
                }
            };
            for key in keys {
                match self.host.storage.delete(&key) {
                    Ok(true) => cleared += 1,
                    Ok(false) => {}
                    Err(e) => warn!(key = %key, error = %e, "Failed to clear auth storage key"),
                }
            }
        }
        cleared
    }

    fn persist(&self, key: &str, value: &str) {
        if let Err(e) = self.host.storage.set(key, value) {
            warn!(key, error = %e, "Failed to persist session state");
        }
    }

    /// Handle everything already queued on `streams` without waiting.
    ///
    /// Messages are drained before popup events. Returns how many items
    /// were handled.
    pub async fn process_pending(&self, streams: &mut SessionStreams) -> usize {
        let mut handled = 0;
        loop {
            if let Ok(message) = streams.messages.try_recv() {
                if let Err(e) = self.handle_message(message).await {
                    warn!(error = %e, "Failed to handle handshake message");
                }
                handled += 1;
                continue;
            }
            if let Ok(event) = streams.popup_events.try_recv() {
                if let Err(e) = self.handle_popup_event(event) {
                    warn!(error = %e, "Failed to handle popup event");
                }
                handled += 1;
                continue;
            }
            return handled;
        }
    }

    /// Drive the machine from its streams until they close.
    pub async fn run(&self, mut streams: SessionStreams) {
        loop {
            tokio::select! {
                biased;
                message = streams.messages.recv() => {
                    let Some(message) = message else { break };
                    if let Err(e) = self.handle_message(message).await {
                        warn!(error = %e, "Failed to handle handshake message");
                    }
                }
                event = streams.popup_events.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = self.handle_popup_event(event) {
                        warn!(error = %e, "Failed to handle popup event");
                    }
                }
            }
        }
        debug!("Session event loop stopped");
    }
}
