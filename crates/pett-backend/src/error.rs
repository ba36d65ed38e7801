//! Backend client error types.

use thiserror::Error;

/// Backend client error type.
#[derive(Error, Debug)]
pub enum BackendError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Unexpected HTTP status with an unparseable body
    #[error("Backend returned {status} ({body_summary})")]
    Status { status: u16, body_summary: String },

    /// The backend answered but refused the request
    #[error("{0}")]
    Rejected(String),
}

impl BackendError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include:
    /// - Connection failures and timeouts
    /// - HTTP errors with 5xx status codes
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            BackendError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias using BackendError.
pub type BackendResult<T> = Result<T, BackendError>;
