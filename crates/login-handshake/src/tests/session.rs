//! Parent login, restore, exchange and logout.

use super::harness::{
    test_config, token_wire, BackendReply, MockBackend, TestHarness, PARENT_URL, TOKEN,
};
use crate::{AuthSessionMachine, HandshakeError, SessionState, StorageKeys, WindowHost};
use handshake_protocol::{ErrorInfo, PopupStatus, ProtocolMessage};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use window_transport::{BroadcastBus, MemoryBrowser, SharedStorage};

async fn deliver_token(h: &mut TestHarness, sent_at: u64) {
    let popup = h.take_popup();
    popup
        .broadcast()
        .publish(&h.config.broadcast_channel, &token_wire(TOKEN, sent_at))
        .unwrap();
    h.pump().await;
}

#[tokio::test]
async fn login_then_token_signs_in_with_pet_identity() {
    let mut h = TestHarness::new();
    h.backend.queue_login(BackendReply::Ok("Rex".to_string()));

    let handle = h.machine.login().unwrap();
    assert!(h.machine.is_logging_in());
    assert_eq!(h.machine.state(), SessionState::AwaitingPopup);
    deliver_token(&mut h, 1000).await;

    let session = h.machine.session();
    assert!(session.authenticated);
    assert_eq!(session.pet_identity.as_deref(), Some("Rex"));
    assert_eq!(session.session_token.as_deref(), Some(TOKEN));
    assert_eq!(session.last_error, None);
    assert!(!h.machine.is_logging_in());
    // The popup is torn down on success.
    assert!(handle.is_closed());
    assert!(h.machine.active_popup().is_none());
}

#[tokio::test]
async fn first_popup_url_has_no_forced_logout() {
    let h = TestHarness::new();
    let handle = h.machine.login().unwrap();

    let url = h.popup_location(handle.name());
    assert_eq!(url.as_str(), "http://localhost:8716/privy-login");
}

#[tokio::test]
async fn blocked_popup_never_leaves_logging_in_set() {
    let h = TestHarness::new();
    h.browser.set_popups_blocked(true);

    let err = h.machine.login().unwrap_err();
    assert!(matches!(err, HandshakeError::TransportBlocked));
    assert!(!h.machine.is_logging_in());
    assert_eq!(h.machine.state(), SessionState::SignedOut);
    assert_eq!(
        h.machine.session().last_error.as_deref(),
        Some(HandshakeError::TransportBlocked.to_string().as_str())
    );

    // Unblocked, the user can simply try again.
    h.browser.set_popups_blocked(false);
    assert!(h.machine.login().is_ok());
    assert!(h.machine.is_logging_in());
    assert_eq!(h.machine.session().last_error, None);
}

#[tokio::test]
async fn login_replaces_previous_popup() {
    let h = TestHarness::new();
    let first = h.machine.login().unwrap();
    let second = h.machine.login().unwrap();

    assert!(first.is_closed());
    assert!(!second.is_closed());
    assert_eq!(h.machine.active_popup().unwrap().name(), second.name());
    assert_eq!(h.browser.open_window_count(), 2);
}

#[tokio::test]
async fn login_while_signed_in_is_rejected() {
    let mut h = TestHarness::new();
    h.machine.login().unwrap();
    deliver_token(&mut h, 1000).await;

    assert!(matches!(
        h.machine.login(),
        Err(HandshakeError::InvalidTransition(_))
    ));
    assert_eq!(h.machine.state(), SessionState::SignedIn);
}

#[tokio::test]
async fn rejected_exchange_surfaces_error_and_allows_retry() {
    let mut h = TestHarness::new();
    h.backend
        .queue_login(BackendReply::Rejected("Invalid Privy token".to_string()));

    h.machine.login().unwrap();
    deliver_token(&mut h, 1000).await;

    let session = h.machine.session();
    assert!(!session.authenticated);
    assert_eq!(
        session.last_error.as_deref(),
        Some("Login failed: Invalid Privy token")
    );
    assert_eq!(h.machine.state(), SessionState::SignedOut);
    assert!(!h.machine.is_logging_in());

    h.machine.login().unwrap();
    deliver_token(&mut h, 2000).await;
    assert!(h.machine.session().authenticated);
    assert_eq!(h.backend.login_calls(), 2);
}

#[tokio::test]
async fn backend_failure_is_reported_as_exchange_failure() {
    let h = TestHarness::new();
    h.backend.queue_login(BackendReply::Status(502));

    h.machine.login().unwrap();
    let err = h.machine.exchange(TOKEN.to_string()).await.unwrap_err();
    assert!(matches!(err, HandshakeError::BackendExchangeFailed(_)));
    assert!(err.is_retryable());
    assert_eq!(h.machine.state(), SessionState::SignedOut);
}

#[tokio::test]
async fn status_and_error_messages_only_update_progress() {
    let h = TestHarness::new();
    h.machine.login().unwrap();

    h.machine
        .handle_message(ProtocolMessage::StatusChanged {
            status: PopupStatus::AwaitingCode,
            message: "Check your email".to_string(),
            error: None,
            sent_at: 1,
        })
        .await
        .unwrap();
    let progress = h.machine.progress();
    assert_eq!(progress.status, Some(PopupStatus::AwaitingCode));
    assert_eq!(progress.message, "Check your email");

    h.machine
        .handle_message(ProtocolMessage::ErrorReported {
            message: "Invalid code".to_string(),
            error: Some(ErrorInfo::new("Invalid code")),
            sent_at: 2,
        })
        .await
        .unwrap();
    assert_eq!(h.machine.progress().message, "Invalid code");
    assert_eq!(h.machine.state(), SessionState::AwaitingPopup);
    assert!(h.machine.is_logging_in());
    assert!(!h.machine.session().authenticated);
}

#[tokio::test]
async fn closed_message_keeps_existing_authentication() {
    let mut h = TestHarness::new();
    h.machine.login().unwrap();
    deliver_token(&mut h, 1000).await;

    h.machine
        .handle_message(ProtocolMessage::Closed {
            message: None,
            sent_at: 3000,
        })
        .await
        .unwrap();
    assert!(h.machine.session().authenticated);
    assert_eq!(h.machine.state(), SessionState::SignedIn);
}

#[tokio::test]
async fn restore_with_authenticated_backend_needs_no_popup() {
    let h = TestHarness::new();
    h.backend.set_authenticated(Some("Rex"));

    let state = h.machine.restore().await.unwrap();
    assert_eq!(state, SessionState::SignedIn);
    assert!(h.machine.session().authenticated);
    assert_eq!(h.machine.session().pet_identity.as_deref(), Some("Rex"));
    assert_eq!(h.browser.open_window_count(), 1);
    assert_eq!(h.backend.health_calls(), 1);
}

#[tokio::test]
async fn restore_without_session_or_backend_stays_signed_out() {
    let h = TestHarness::new();
    assert_eq!(h.machine.restore().await.unwrap(), SessionState::SignedOut);

    h.backend.set_health_unavailable();
    assert_eq!(h.machine.restore().await.unwrap(), SessionState::SignedOut);
    assert!(!h.machine.session().authenticated);
    assert_eq!(h.backend.health_calls(), 2);
}

#[tokio::test]
async fn restore_is_skipped_once_login_started() {
    let h = TestHarness::new();
    h.backend.set_authenticated(Some("Rex"));
    h.machine.login().unwrap();

    assert_eq!(h.machine.restore().await.unwrap(), SessionState::AwaitingPopup);
    assert_eq!(h.backend.health_calls(), 0);
}

#[tokio::test]
async fn logout_when_signed_out_is_a_quiet_no_op() {
    let h = TestHarness::new();
    assert_eq!(h.machine.logout().await.unwrap(), SessionState::SignedOut);
    assert_eq!(h.machine.logout().await.unwrap(), SessionState::SignedOut);
    assert!(!h.machine.session().authenticated);
    assert_eq!(h.machine.session().last_error, None);
}

#[tokio::test]
async fn logout_clears_session_and_auth_storage() {
    let mut h = TestHarness::new();
    h.machine.login().unwrap();
    deliver_token(&mut h, 1000).await;

    let storage = h.parent.storage();
    storage.set("privy:refresh_token", "r").unwrap();
    storage.set("privy-session", "s").unwrap();
    storage.set("theme", "dark").unwrap();

    assert_eq!(h.machine.logout().await.unwrap(), SessionState::SignedOut);

    assert_eq!(h.machine.session(), crate::AuthSession::default());
    assert_eq!(h.backend.logout_calls(), 1);
    assert_eq!(h.parent_storage("privy:refresh_token"), None);
    assert_eq!(h.parent_storage("privy-session"), None);
    assert_eq!(h.parent_storage("theme").as_deref(), Some("dark"));
    assert_eq!(h.parent_storage(StorageKeys::RESET_SEQ).as_deref(), Some("1"));
    assert_eq!(
        h.parent_storage(StorageKeys::FORCE_LOGOUT_PENDING).as_deref(),
        Some("1")
    );
}

#[tokio::test]
async fn login_after_logout_forces_popup_logout() {
    let mut h = TestHarness::new();
    h.machine.login().unwrap();
    deliver_token(&mut h, 1000).await;
    h.machine.logout().await.unwrap();

    let handle = h.machine.login().unwrap();
    let url = h.popup_location(handle.name());
    assert_eq!(
        url.as_str(),
        "http://localhost:8716/privy-login?forceLogout=1&resetSeq=1"
    );

    h.machine.logout().await.unwrap();
    let handle = h.machine.login().unwrap();
    assert!(h
        .popup_location(handle.name())
        .as_str()
        .ends_with("forceLogout=1&resetSeq=2"));
}

#[tokio::test]
async fn successful_login_clears_pending_forced_logout() {
    let mut h = TestHarness::new();
    h.machine.logout().await.unwrap();

    h.machine.login().unwrap();
    deliver_token(&mut h, 1000).await;
    assert!(h.machine.session().authenticated);
    assert_eq!(h.parent_storage(StorageKeys::FORCE_LOGOUT_PENDING), None);
    assert_eq!(h.parent_storage(StorageKeys::RESET_SEQ).as_deref(), Some("1"));

    h.machine.logout().await.unwrap();
    let snapshot = h.machine.snapshot();
    assert_eq!(snapshot.reset_seq, 2);
    assert!(snapshot.force_logout_pending);
}

#[tokio::test]
async fn exchange_superseded_by_logout_is_discarded() {
    let h = TestHarness::new();
    let gate = h.backend.hold_exchanges();
    h.machine.login().unwrap();

    let machine = h.machine.clone();
    let exchange = tokio::spawn(async move { machine.exchange(TOKEN.to_string()).await });
    while h.backend.login_calls() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(h.machine.state(), SessionState::Exchanging);

    h.machine.logout().await.unwrap();
    gate.notify_one();

    let state = exchange.await.unwrap().unwrap();
    assert_eq!(state, SessionState::SignedOut);
    assert!(!h.machine.session().authenticated);
    assert_eq!(h.machine.session().session_token, None);
}

#[tokio::test]
async fn state_callback_sees_every_transition() {
    let mut h = TestHarness::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    h.machine.set_state_callback(Box::new(move |payload| {
        sink.lock().unwrap().push((payload.state, payload.pet_identity));
    }));

    h.machine.login().unwrap();
    deliver_token(&mut h, 1000).await;

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            (SessionState::AwaitingPopup, None),
            (SessionState::Exchanging, None),
            (SessionState::SignedIn, Some("Rex".to_string())),
        ]
    );
}

#[tokio::test]
async fn run_loop_drives_the_machine() {
    let browser = MemoryBrowser::new();
    let parent = browser.create_window(PARENT_URL, None).unwrap();
    let backend = Arc::new(MockBackend::new());
    let config = test_config();
    let (machine, streams) = AuthSessionMachine::new(
        config.clone(),
        WindowHost::from_memory(&parent),
        backend.clone(),
    )
    .unwrap();
    let machine = Arc::new(machine);
    let task = {
        let machine = machine.clone();
        tokio::spawn(async move { machine.run(streams).await })
    };

    let mut opened = browser.watch_opened();
    machine.login().unwrap();
    let popup = opened.recv().await.unwrap();
    popup
        .broadcast()
        .publish(&config.broadcast_channel, &token_wire(TOKEN, 1000))
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while machine.state() != SessionState::SignedIn {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(backend.login_calls(), 1);
    task.abort();
}

#[tokio::test]
async fn zero_liveness_interval_is_rejected_at_construction() {
    let browser = MemoryBrowser::new();
    let parent = browser.create_window(PARENT_URL, None).unwrap();
    let config = crate::HandshakeConfig {
        liveness_interval_ms: 0,
        ..test_config()
    };

    let result = AuthSessionMachine::new(
        config,
        WindowHost::from_memory(&parent),
        Arc::new(MockBackend::new()),
    );
    assert!(matches!(result, Err(HandshakeError::Config(_))));
    assert_eq!(browser.open_window_count(), 1);
}
