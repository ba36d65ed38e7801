//! Handshake configuration.

use crate::{HandshakeError, HandshakeResult};
use handshake_protocol::{HostContext, Origin};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Default backend base URL (the local agent server).
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8716";

/// Default popup route, relative to the dashboard origin.
pub const DEFAULT_POPUP_PATH: &str = "/privy-login";

/// Default popup size, sized for the login form.
pub const DEFAULT_POPUP_WIDTH: u32 = 480;
pub const DEFAULT_POPUP_HEIGHT: u32 = 720;

/// Default popup liveness poll interval.
pub const DEFAULT_LIVENESS_INTERVAL_MS: u64 = 500;

/// Default broadcast channel name.
pub const DEFAULT_BROADCAST_CHANNEL: &str = window_transport::DEFAULT_BROADCAST_CHANNEL;

/// Default storage-fallback key.
pub const DEFAULT_STORAGE_KEY: &str = window_transport::DEFAULT_STORAGE_KEY;

/// Default backend request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Storage key prefixes cleared on logout (identity SDK state and handshake scratch).
pub const DEFAULT_AUTH_STORAGE_PREFIXES: &[&str] = &["privy:", "privy-", "pett-auth:"];

/// Handshake configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Backend base URL for `/api/*`.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Popup route on the dashboard origin.
    #[serde(default = "default_popup_path")]
    pub popup_path: String,
    #[serde(default = "default_popup_width")]
    pub popup_width: u32,
    #[serde(default = "default_popup_height")]
    pub popup_height: u32,
    /// Popup liveness poll interval in milliseconds.
    #[serde(default = "default_liveness_interval_ms")]
    pub liveness_interval_ms: u64,
    #[serde(default = "default_broadcast_channel")]
    pub broadcast_channel: String,
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    /// Shared-storage key prefixes removed on logout.
    #[serde(default = "default_auth_storage_prefixes")]
    pub auth_storage_prefixes: Vec<String>,
    /// Backend request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Execution context passed to the popup.
    #[serde(default)]
    pub host_context: HostContext,
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

fn default_popup_path() -> String {
    DEFAULT_POPUP_PATH.to_string()
}

fn default_popup_width() -> u32 {
    DEFAULT_POPUP_WIDTH
}

fn default_popup_height() -> u32 {
    DEFAULT_POPUP_HEIGHT
}

fn default_liveness_interval_ms() -> u64 {
    DEFAULT_LIVENESS_INTERVAL_MS
}

fn default_broadcast_channel() -> String {
    DEFAULT_BROADCAST_CHANNEL.to_string()
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

fn default_auth_storage_prefixes() -> Vec<String> {
    DEFAULT_AUTH_STORAGE_PREFIXES
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            popup_path: default_popup_path(),
            popup_width: DEFAULT_POPUP_WIDTH,
            popup_height: DEFAULT_POPUP_HEIGHT,
            liveness_interval_ms: DEFAULT_LIVENESS_INTERVAL_MS,
            broadcast_channel: default_broadcast_channel(),
            storage_key: default_storage_key(),
            auth_storage_prefixes: default_auth_storage_prefixes(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            host_context: HostContext::default(),
            log_level: default_log_level(),
        }
    }
}

/// `~/.pett/login.json`, if a home directory exists.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".pett").join("login.json"))
}

impl HandshakeConfig {
    /// Create a new config with default values, then override from environment.
    pub fn new() -> HandshakeResult<Self> {
        let mut config = Self::default();
        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file if it exists, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> HandshakeResult<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::load_from_file(path)?,
            _ => Self::default(),
        };
        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> HandshakeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HandshakeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> HandshakeResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    pub fn load_from_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("PETT_BACKEND_URL") {
            self.backend_url = url;
        }
        if let Some(level) = lookup("PETT_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(interval) = lookup("PETT_LIVENESS_INTERVAL_MS")
            .and_then(|v| v.trim().parse().ok())
            .filter(|ms: &u64| *ms > 0)
        {
            self.liveness_interval_ms = interval;
        }
    }

    /// Reject values that would make the handshake unusable.
    pub fn validate(&self) -> HandshakeResult<()> {
        self.backend_url()?;
        if !self.popup_path.starts_with('/') {
            return Err(HandshakeError::Config(format!(
                "popup_path must be absolute: {}",
                self.popup_path
            )));
        }
        if self.liveness_interval_ms == 0 {
            return Err(HandshakeError::Config(
                "liveness_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.broadcast_channel.trim().is_empty() || self.storage_key.trim().is_empty() {
            return Err(HandshakeError::Config(
                "broadcast_channel and storage_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the backend URL as a parsed URL.
    pub fn backend_url(&self) -> HandshakeResult<Url> {
        Url::parse(&self.backend_url)
            .map_err(|e| HandshakeError::Config(format!("invalid backend_url: {}", e)))
    }

    /// Popup URL on the given dashboard origin, before launch parameters.
    pub fn popup_url(&self, origin: &Origin) -> HandshakeResult<Url> {
        let base = origin.to_url()?;
        base.join(&self.popup_path)
            .map_err(|e| HandshakeError::Config(format!("invalid popup_path: {}", e)))
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
