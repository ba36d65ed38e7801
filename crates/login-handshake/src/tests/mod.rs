//! Scenario tests for the login handshake.
//!
//! - `harness.rs`      - Mock backend and in-memory browser harness
//! - `delivery.rs`     - Redundant delivery, dedup and origin checks
//! - `session.rs`      - Parent login, restore, exchange and logout
//! - `handshake.rs`    - Parent and popup running end to end
//! - `popup_flow.rs`   - Popup-side email/code flow and failures
//! - `reset.rs`        - Reset sequence and forced identity logout
//! - `registration.rs` - Pet registration after a credential exchange

mod delivery;
mod handshake;
mod registration;
mod session;

#[allow(unused_imports)]
pub use harness::{MockBackend, TestHarness};
