//! Request and response bodies.
//!
//! The backend is loose about field names, so every response field is
//! optional and aliases are resolved by accessor methods.

use crate::{BackendError, BackendResult};
use serde::{Deserialize, Deserializer, Serialize};

/// Auth errors that mean "valid credential, but no pet registered yet".
const REGISTRATION_INDICATORS: &[&str] = &[
    "user not found",
    "pet not found",
    "no pet",
    "needs registration",
];

/// `null` is treated like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub privy_token: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub privy_token: &'a str,
    pub pet_name: &'a str,
}

/// Response of `/api/login` and `/api/register`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoginResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub success: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pet_name: Option<String>,
    #[serde(default)]
    pub authenticated: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub requires_registration: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub auth_error: Option<String>,
    #[serde(default)]
    pub register_error: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl LoginResponse {
    /// Pet name, from `name` or `pet_name`.
    pub fn pet_identity(&self) -> Option<&str> {
        [&self.name, &self.pet_name]
            .into_iter()
            .filter_map(|n| n.as_deref())
            .map(str::trim)
            .find(|n| !n.is_empty())
    }

    /// First non-empty error text, from `message`, `auth_error`,
    /// `register_error` or `error`.
    pub fn error_message(&self) -> Option<&str> {
        [
            &self.message,
            &self.auth_error,
            &self.register_error,
            &self.error,
        ]
        .into_iter()
        .filter_map(|m| m.as_deref())
        .map(str::trim)
        .find(|m| !m.is_empty())
    }

    /// Whether the credential is valid but has no pet yet.
    pub fn needs_registration(&self) -> bool {
        if self.success && self.pet_identity().is_some() {
            return false;
        }
        if self.requires_registration {
            return true;
        }
        self.auth_error
            .as_deref()
            .map(|e| {
                let lowered = e.to_lowercase();
                REGISTRATION_INDICATORS.iter().any(|i| lowered.contains(i))
            })
            .unwrap_or(false)
    }

    /// Turn an unsuccessful response into `BackendError::Rejected`.
    pub fn into_result(self) -> BackendResult<Self> {
        if self.success {
            return Ok(self);
        }
        let message = self.error_message().unwrap_or("Login failed").to_string();
        Err(BackendError::Rejected(message))
    }
}

/// WebSocket section of `/api/health`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsocketHealth {
    #[serde(default, deserialize_with = "null_as_default")]
    pub authenticated: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub auth_token_present: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub connected: bool,
}

/// Pet section of `/api/health`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PetHealth {
    #[serde(default, deserialize_with = "null_as_default")]
    pub connected: bool,
    #[serde(default)]
    pub name: Option<String>,
}

/// Response of `/api/health`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    #[serde(default, deserialize_with = "null_as_default")]
    pub websocket: WebsocketHealth,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pet: PetHealth,
}

impl HealthReport {
    pub fn is_authenticated(&self) -> bool {
        self.websocket.authenticated
    }

    pub fn pet_name(&self) -> Option<&str> {
        self.pet
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }
}
