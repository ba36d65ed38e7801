//! Pett backend session endpoints.
//!
//! The parent window exchanges the credential delivered by the login popup
//! for a server-side session:
//!
//! - `POST /api/login` exchanges a credential
//! - `POST /api/register` creates a pet for a credential with no pet yet
//! - `POST /api/logout` ends the session (best-effort)
//! - `GET /api/health` reports whether a session is already established

mod client;
mod error;
mod types;

pub use client::{BackendClient, HttpBackendClient, DEFAULT_REQUEST_TIMEOUT};
pub use error::{BackendError, BackendResult};
pub use types::{HealthReport, LoginResponse, PetHealth, WebsocketHealth};
