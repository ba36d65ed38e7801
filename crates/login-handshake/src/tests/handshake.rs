//! Parent and popup running end to end.

use super::harness::{TestHarness, TOKEN};
use crate::{HandshakeError, PopupEvent, SessionState};
use handshake_protocol::{ErrorCode, PopupStatus};
use window_transport::WindowContext;

#[tokio::test]
async fn popup_login_signs_in_parent_exactly_once() {
    let mut h = TestHarness::new();
    let popup = h.complete_popup_login().await;

    // The popup closes itself once the credential is out.
    assert!(popup.is_closed());
    h.pump().await;

    assert_eq!(h.backend.login_calls(), 1);
    assert_eq!(h.backend.login_tokens(), vec![TOKEN.to_string()]);
    assert_eq!(h.machine.state(), SessionState::SignedIn);
    let session = h.machine.session();
    assert!(session.authenticated);
    assert_eq!(session.pet_identity.as_deref(), Some("Rex"));
    assert_eq!(h.machine.progress().status, Some(PopupStatus::Completed));
    assert!(!h.machine.is_logging_in());
}

#[tokio::test]
async fn popup_progress_is_mirrored_in_parent() {
    let mut h = TestHarness::new();
    h.machine.login().unwrap();
    let popup = h.take_popup();
    let child = h.child(&popup, h.identity_for(&popup));

    child.start().await.unwrap();
    child.submit_email("rex@pett.ai").await.unwrap();
    h.pump().await;

    let progress = h.machine.progress();
    assert_eq!(progress.status, Some(PopupStatus::AwaitingCode));
    assert_eq!(progress.message, child.message());
    assert_eq!(h.machine.state(), SessionState::AwaitingPopup);
}

#[tokio::test]
async fn popup_closed_before_any_status_reports_lost_connection() {
    let mut h = TestHarness::new();
    h.machine.login().unwrap();
    let popup = h.take_popup();

    popup.close();
    h.wait_for_popup_event().await;

    assert_eq!(h.machine.state(), SessionState::SignedOut);
    assert!(!h.machine.is_logging_in());
    assert!(h.machine.active_popup().is_none());
    let progress = h.machine.progress();
    assert_eq!(progress.message, HandshakeError::PopupLost.to_string());
    assert_eq!(
        progress.error.and_then(|e| e.code),
        Some(ErrorCode::Text("popup_lost".to_string()))
    );
}

#[tokio::test]
async fn popup_closed_after_progress_keeps_last_message() {
    let mut h = TestHarness::new();
    h.machine.login().unwrap();
    let popup = h.take_popup();
    let child = h.child(&popup, h.identity_for(&popup));
    child.start().await.unwrap();
    h.pump().await;

    popup.close();
    h.wait_for_popup_event().await;

    assert_eq!(h.machine.state(), SessionState::SignedOut);
    assert!(!h.machine.is_logging_in());
    assert_eq!(h.machine.progress().status, Some(PopupStatus::Prompting));
    assert_eq!(h.machine.progress().error, None);
}

#[tokio::test]
async fn closure_of_replaced_popup_is_ignored() {
    let h = TestHarness::new();
    let first = h.machine.login().unwrap();
    let second = h.machine.login().unwrap();

    h.machine
        .handle_popup_event(PopupEvent::Closed {
            popup_name: first.name().to_string(),
        })
        .unwrap();

    assert_eq!(h.machine.state(), SessionState::AwaitingPopup);
    assert!(h.machine.is_logging_in());
    assert_eq!(h.machine.active_popup().unwrap().name(), second.name());
}

#[tokio::test]
async fn parent_signed_in_by_another_popup_ignores_second_token() {
    let mut h = TestHarness::new();
    h.complete_popup_login().await;
    h.pump().await;
    assert_eq!(h.machine.state(), SessionState::SignedIn);

    let state = h.machine.exchange("another-token".to_string()).await.unwrap();
    assert_eq!(state, SessionState::SignedIn);
    assert_eq!(h.backend.login_calls(), 1);
    assert_eq!(h.machine.session().session_token.as_deref(), Some(TOKEN));
}
