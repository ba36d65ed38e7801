//! HTTP client for the backend session endpoints.

use crate::types::{LoginRequest, RegisterRequest};
use crate::{BackendError, BackendResult, HealthReport, LoginResponse};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// Backend session operations used by the parent window.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Exchange a login credential for a backend session.
    ///
    /// An unsuccessful but well-formed answer is `Ok` with `success == false`.
    async fn exchange_token(&self, token: &str) -> BackendResult<LoginResponse>;

    /// Register a pet for a credential that has none yet.
    async fn register_pet(&self, token: &str, pet_name: &str) -> BackendResult<LoginResponse>;

    /// End the backend session. Any HTTP response counts as done.
    async fn logout(&self) -> BackendResult<()>;

    /// Report whether a backend session already exists.
    async fn health(&self) -> BackendResult<HealthReport>;
}

/// reqwest implementation of [`BackendClient`].
#[derive(Clone)]
pub struct HttpBackendClient {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpBackendClient {
    /// Create a client for a backend at `base_url` (e.g. `http://localhost:8716`).
    pub fn new(base_url: &str, timeout: Duration) -> BackendResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> BackendResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Parse a login-shaped response.
    ///
    /// 2xx and 4xx answers with a JSON body are backend verdicts; anything
    /// else is an error.
    async fn read_login_response(
        &self,
        response: reqwest::Response,
        operation: &str,
    ) -> BackendResult<LoginResponse> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() || status.is_client_error() {
            if let Ok(parsed) = serde_json::from_str::<LoginResponse>(&body) {
                debug!(
                    operation,
                    status = status.as_u16(),
                    success = parsed.success,
                    requires_registration = parsed.requires_registration,
                    "Backend answered"
                );
                return Ok(parsed);
            }
        }

        let body_summary = summarize_response_body(&body);
        error!(operation, status = %status, body_summary = %body_summary, "Unexpected backend response");
        Err(BackendError::Status {
            status: status.as_u16(),
            body_summary,
        })
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn exchange_token(&self, token: &str) -> BackendResult<LoginResponse> {
        let url = self.endpoint("api/login")?;
        info!(token_len = token.len(), "Exchanging login credential");

        let response = self
            .http_client
            .post(url)
            .json(&LoginRequest { privy_token: token })
            .send()
            .await?;
        self.read_login_response(response, "login").await
    }

    async fn register_pet(&self, token: &str, pet_name: &str) -> BackendResult<LoginResponse> {
        let url = self.endpoint("api/register")?;
        info!(pet_name, "Registering pet");

        let response = self
            .http_client
            .post(url)
            .json(&RegisterRequest {
                privy_token: token,
                pet_name,
            })
            .send()
            .await?;
        self.read_login_response(response, "register").await
    }

    async fn logout(&self) -> BackendResult<()> {
        let url = self.endpoint("api/logout")?;
        let response = self.http_client.post(url).send().await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "Backend logout returned non-success, ignoring");
        }
        Ok(())
    }

    async fn health(&self) -> BackendResult<HealthReport> {
        let url = self.endpoint("api/health")?;
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let body_summary = summarize_response_body(&body);
            error!(status = %status, body_summary = %body_summary, "Health check failed");
            return Err(BackendError::Status {
                status: status.as_u16(),
                body_summary,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}
