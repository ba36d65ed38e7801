//! Identity provider seam (email + one-time code).

use crate::keys::StorageKeys;
use crate::{HandshakeError, HandshakeResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};
use window_transport::SharedStorage;

/// The email/code identity vendor used inside the popup.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Whether an identity session already exists.
    async fn is_authenticated(&self) -> HandshakeResult<bool>;

    /// Dispatch a one-time code to `email`.
    async fn send_code(&self, email: &str) -> HandshakeResult<()>;

    /// Verify `code` for `email` and establish a session.
    async fn login_with_code(&self, email: &str, code: &str) -> HandshakeResult<()>;

    /// Credential for the current session, if any.
    async fn access_token(&self) -> HandshakeResult<Option<String>>;

    /// Drop the current session. A no-op when there is none.
    async fn logout(&self) -> HandshakeResult<()>;
}

#[derive(Default)]
struct ScriptState {
    session: Option<String>,
    code_sent_to: Option<String>,
    sent_codes: Vec<String>,
    fail_next_send: Option<String>,
    fail_next_login: Option<String>,
    logout_count: usize,
}

/// Scripted in-process identity provider.
///
/// Any code is accepted unless one was set with [`Self::with_code`]. When
/// backed by shared storage, the session lives under
/// [`StorageKeys::IDENTITY_SESSION`] and disappears if another window clears
/// auth storage on the same origin.
pub struct MemoryIdentityProvider {
    token: String,
    expected_code: Option<String>,
    storage: Option<Arc<dyn SharedStorage>>,
    state: Mutex<ScriptState>,
}

impl MemoryIdentityProvider {
    /// Provider that issues `token` on successful login.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expected_code: None,
            storage: None,
            state: Mutex::new(ScriptState::default()),
        }
    }

    /// Only accept this code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.expected_code = Some(code.into());
        self
    }

    /// Keep the session in shared storage instead of in memory.
    pub fn with_storage(mut self, storage: Arc<dyn SharedStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Start with an existing session.
    pub fn seed_session(&self) -> HandshakeResult<()> {
        self.store_session(Some(self.token.clone()))
    }

    /// Make the next `send_code` fail with `message`.
    pub fn fail_next_send(&self, message: impl Into<String>) {
        self.state.lock().fail_next_send = Some(message.into());
    }

    /// Make the next `login_with_code` fail with `message`.
    pub fn fail_next_login(&self, message: impl Into<String>) {
        self.state.lock().fail_next_login = Some(message.into());
    }

    /// Emails a code was dispatched to, in order.
    pub fn sent_codes(&self) -> Vec<String> {
        self.state.lock().sent_codes.clone()
    }

    pub fn logout_count(&self) -> usize {
        self.state.lock().logout_count
    }

    fn load_session(&self) -> HandshakeResult<Option<String>> {
        match &self.storage {
            Some(storage) => Ok(storage.get(StorageKeys::IDENTITY_SESSION)?),
            None => Ok(self.state.lock().session.clone()),
        }
    }

    fn store_session(&self, session: Option<String>) -> HandshakeResult<()> {
        match (&self.storage, session) {
            (Some(storage), Some(token)) => storage.set(StorageKeys::IDENTITY_SESSION, &token)?,
            (Some(storage), None) => {
                storage.delete(StorageKeys::IDENTITY_SESSION)?;
            }
            (None, session) => self.state.lock().session = session,
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn is_authenticated(&self) -> HandshakeResult<bool> {
        Ok(self.load_session()?.is_some())
    }

    async fn send_code(&self, email: &str) -> HandshakeResult<()> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_next_send.take() {
            return Err(HandshakeError::Identity(message));
        }
        state.code_sent_to = Some(email.to_string());
        state.sent_codes.push(email.to_string());
        debug!(email, "Verification code dispatched");
        Ok(())
    }

    async fn login_with_code(&self, email: &str, code: &str) -> HandshakeResult<()> {
        {
            let mut state = self.state.lock();
            if let Some(message) = state.fail_next_login.take() {
                return Err(HandshakeError::Identity(message));
            }
            if state.code_sent_to.as_deref() != Some(email) {
                return Err(HandshakeError::Identity(
                    "No code was requested for this email".to_string(),
                ));
            }
            if let Some(expected) = &self.expected_code {
                if expected != code {
                    return Err(HandshakeError::Identity(
                        "Invalid verification code".to_string(),
                    ));
                }
            }
            state.code_sent_to = None;
        }
        self.store_session(Some(self.token.clone()))?;
        info!(email, "Identity session established");
        Ok(())
    }

    async fn access_token(&self) -> HandshakeResult<Option<String>> {
        self.load_session()
    }

    async fn logout(&self) -> HandshakeResult<()> {
        self.store_session(None)?;
        self.state.lock().logout_count += 1;
        debug!("Identity session cleared");
        Ok(())
    }
}
