//! Pet registration after a credential exchange.

use super::harness::{token_wire, BackendReply, TestHarness, TOKEN};
use crate::{HandshakeError, SessionState};
use window_transport::BroadcastBus;

async fn exchange_needing_registration(h: &mut TestHarness) {
    h.backend.queue_login(BackendReply::NeedsRegistration);
    h.machine.login().unwrap();
    let popup = h.take_popup();
    popup
        .broadcast()
        .publish(&h.config.broadcast_channel, &token_wire(TOKEN, 1000))
        .unwrap();
    h.pump().await;
}

#[tokio::test]
async fn registration_completes_sign_in() {
    let mut h = TestHarness::new();
    exchange_needing_registration(&mut h).await;

    assert_eq!(h.machine.state(), SessionState::NeedsRegistration);
    let session = h.machine.session();
    assert!(session.requires_registration);
    assert!(!session.authenticated);
    assert_eq!(session.session_token.as_deref(), Some(TOKEN));
    assert!(!h.machine.is_logging_in());
    assert!(h.machine.active_popup().is_none());

    let state = h.machine.register_pet("  Biscuit ").await.unwrap();
    assert_eq!(state, SessionState::SignedIn);
    assert_eq!(h.backend.registered_names(), vec!["Biscuit".to_string()]);
    let session = h.machine.session();
    assert!(session.authenticated);
    assert!(!session.requires_registration);
    assert_eq!(session.pet_identity.as_deref(), Some("Biscuit"));
}

#[tokio::test]
async fn rejected_registration_can_be_resubmitted() {
    let mut h = TestHarness::new();
    exchange_needing_registration(&mut h).await;
    h.backend
        .queue_register(BackendReply::RegistrationRejected("Name already taken".to_string()));

    let state = h.machine.register_pet("Rex").await.unwrap();
    assert_eq!(state, SessionState::NeedsRegistration);
    let session = h.machine.session();
    assert_eq!(session.last_error.as_deref(), Some("Name already taken"));
    assert_eq!(session.session_token.as_deref(), Some(TOKEN));

    assert_eq!(
        h.machine.register_pet("Rex II").await.unwrap(),
        SessionState::SignedIn
    );
    assert_eq!(h.machine.session().last_error, None);
}

#[tokio::test]
async fn blank_pet_name_is_refused() {
    let mut h = TestHarness::new();
    exchange_needing_registration(&mut h).await;

    let err = h.machine.register_pet("   ").await.unwrap_err();
    assert!(matches!(err, HandshakeError::InvalidPetName));
    assert!(h.backend.registered_names().is_empty());
    assert_eq!(h.machine.state(), SessionState::NeedsRegistration);
}

#[tokio::test]
async fn registration_needs_a_pending_credential() {
    let h = TestHarness::new();
    let err = h.machine.register_pet("Rex").await.unwrap_err();
    assert!(matches!(err, HandshakeError::InvalidTransition(_)));
    assert!(h.backend.registered_names().is_empty());
}

#[tokio::test]
async fn logout_abandons_pending_registration() {
    let mut h = TestHarness::new();
    exchange_needing_registration(&mut h).await;

    assert_eq!(h.machine.logout().await.unwrap(), SessionState::SignedOut);
    let session = h.machine.session();
    assert_eq!(session.session_token, None);
    assert!(!session.requires_registration);
}
