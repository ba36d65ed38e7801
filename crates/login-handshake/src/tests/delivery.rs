//! Redundant delivery, dedup and origin checks.

use super::harness::{encode, token_wire, TestHarness, TOKEN};
use crate::SessionState;
use handshake_protocol::WireMessage;
use window_transport::{BroadcastBus, SharedStorage};

#[tokio::test]
async fn duplicate_token_on_every_channel_exchanges_once() {
    let mut h = TestHarness::new();
    h.machine.login().unwrap();
    let popup = h.take_popup();
    let data = token_wire(TOKEN, 1000);

    h.parent.reference_from(&popup).post_message(&data, "*").unwrap();
    popup.broadcast().publish(&h.config.broadcast_channel, &data).unwrap();
    popup.storage().set(&h.config.storage_key, &data).unwrap();

    h.pump().await;
    assert_eq!(h.backend.login_calls(), 1);
    assert_eq!(h.machine.state(), SessionState::SignedIn);
}

#[tokio::test]
async fn repeated_token_with_same_sent_at_is_dropped() {
    let mut h = TestHarness::new();
    h.machine.login().unwrap();
    let popup = h.take_popup();
    let bus = popup.broadcast();

    bus.publish(&h.config.broadcast_channel, &token_wire(TOKEN, 1000)).unwrap();
    bus.publish(&h.config.broadcast_channel, &token_wire(TOKEN, 1000)).unwrap();
    bus.publish(&h.config.broadcast_channel, &token_wire(TOKEN, 999)).unwrap();

    h.pump().await;
    assert_eq!(h.backend.login_calls(), 1);
}

#[tokio::test]
async fn token_from_foreign_origin_changes_nothing() {
    let mut h = TestHarness::new();
    h.machine.login().unwrap();
    let evil = h.browser.create_window("https://evil.example/", None).unwrap();

    h.parent
        .reference_from(&evil)
        .post_message(&token_wire("stolen", 1000), "*")
        .unwrap();

    assert_eq!(h.pump().await, 0);
    assert_eq!(h.backend.login_calls(), 0);
    assert_eq!(h.machine.state(), SessionState::AwaitingPopup);
    assert!(h.machine.is_logging_in());
}

#[tokio::test]
async fn loopback_alias_is_accepted_on_direct_channel() {
    let mut h = TestHarness::new();
    h.machine.login().unwrap();
    let alias = h.browser.create_window("http://127.0.0.1:8716/", None).unwrap();

    h.parent
        .reference_from(&alias)
        .post_message(&token_wire(TOKEN, 1000), "*")
        .unwrap();

    h.pump().await;
    assert_eq!(h.backend.login_tokens(), vec![TOKEN.to_string()]);
}

#[tokio::test]
async fn unknown_and_malformed_messages_are_ignored() {
    let mut h = TestHarness::new();
    h.machine.login().unwrap();
    let popup = h.take_popup();
    let bus = popup.broadcast();
    let channel = h.config.broadcast_channel.clone();

    bus.publish(&channel, "not json").unwrap();
    bus.publish(
        &channel,
        &encode(&WireMessage {
            kind: "privy-something-else".to_string(),
            sent_at: Some(1),
            ..Default::default()
        }),
    )
    .unwrap();
    // Token message without a token
    bus.publish(
        &channel,
        &encode(&WireMessage {
            kind: "privy-token".to_string(),
            sent_at: Some(2),
            ..Default::default()
        }),
    )
    .unwrap();

    assert_eq!(h.pump().await, 0);
    assert_eq!(h.machine.state(), SessionState::AwaitingPopup);
}

#[tokio::test]
async fn token_arriving_after_dismissal_is_still_accepted() {
    let mut h = TestHarness::new();
    h.machine.login().unwrap();
    let popup = h.take_popup();
    let bus = popup.broadcast();

    bus.publish(
        &h.config.broadcast_channel,
        &encode(&WireMessage {
            kind: "privy-popup-closed".to_string(),
            sent_at: Some(10),
            ..Default::default()
        }),
    )
    .unwrap();
    h.pump().await;
    assert_eq!(h.machine.state(), SessionState::SignedOut);
    assert!(!h.machine.is_logging_in());

    bus.publish(&h.config.broadcast_channel, &token_wire(TOKEN, 11)).unwrap();
    h.pump().await;
    assert_eq!(h.backend.login_calls(), 1);
    assert_eq!(h.machine.state(), SessionState::SignedIn);
}

#[tokio::test]
async fn new_login_attempt_forgets_previous_sent_at() {
    let mut h = TestHarness::new();
    h.machine.login().unwrap();
    let popup = h.take_popup();
    popup
        .broadcast()
        .publish(&h.config.broadcast_channel, &token_wire(TOKEN, 5000))
        .unwrap();
    h.pump().await;
    h.machine.logout().await.unwrap();

    // A fresh popup's clock may start lower than the last accepted value.
    h.machine.login().unwrap();
    let popup = h.take_popup();
    popup
        .broadcast()
        .publish(&h.config.broadcast_channel, &token_wire(TOKEN, 100))
        .unwrap();
    h.pump().await;
    assert_eq!(h.backend.login_calls(), 2);
    assert_eq!(h.machine.state(), SessionState::SignedIn);
}
