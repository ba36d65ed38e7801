//! CLI command implementations.

mod session;
mod simulate;

pub use session::{health, logout, restore};
pub use simulate::{simulate, SimulateArgs};

use anyhow::{Context, Result};
use handshake_protocol::Origin;
use login_handshake::{
    default_config_path, AuthSessionMachine, HandshakeConfig, StorageKeys, WindowHost,
};
use pett_backend::{BackendClient, HttpBackendClient};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use window_transport::{MemoryBrowser, MemoryWindow, SharedStorage};

/// Load the config file and environment, then apply command-line flags.
pub fn load_config(
    path: Option<&Path>,
    backend_url: Option<&str>,
    log_level: Option<&str>,
) -> Result<HandshakeConfig> {
    let path = path.map(Path::to_path_buf).or_else(default_config_path);
    let mut config = HandshakeConfig::load(path.as_deref())
        .with_context(|| format!("failed to load config from {:?}", path))?;

    if let Some(url) = backend_url {
        config.backend_url = url.to_string();
    }
    if let Some(level) = log_level {
        config.log_level = level.to_string();
    }
    config.validate()?;
    Ok(config)
}

/// `~/.pett/login-state.json`: the dashboard's storage between runs.
fn default_state_path() -> Option<PathBuf> {
    default_config_path().map(|path| path.with_file_name("login-state.json"))
}

/// An in-memory dashboard tab on the backend origin.
///
/// The handshake's bookkeeping keys are loaded from and saved to a state
/// file, so the reset sequence survives between invocations. Identity and
/// transport keys may hold a credential and are never written out.
pub(crate) struct Dashboard {
    pub browser: MemoryBrowser,
    pub window: MemoryWindow,
    origin: Origin,
    state_path: Option<PathBuf>,
}

impl Dashboard {
    pub fn open(config: &HandshakeConfig, state_path: Option<PathBuf>) -> Result<Self> {
        let url = config.backend_url()?;
        let origin = Origin::from_url(&url)?;
        let browser = MemoryBrowser::new();
        let window = browser.create_window(url.as_str(), None)?;

        if let Some(path) = &state_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let entries: BTreeMap<String, String> = serde_json::from_str(&content)
                    .with_context(|| format!("failed to parse {}", path.display()))?;
                let storage = window.storage();
                let entries: Vec<_> = entries
                    .iter()
                    .filter(|(key, _)| StorageKeys::is_handshake_key(key))
                    .collect();
                for (key, value) in &entries {
                    storage.set(key, value)?;
                }
                debug!(path = %path.display(), keys = entries.len(), "Dashboard storage loaded");
            }
        }

        Ok(Self {
            browser,
            window,
            origin,
            state_path,
        })
    }

    /// Open the dashboard with the default state file.
    pub fn open_default(config: &HandshakeConfig) -> Result<Self> {
        Self::open(config, default_state_path())
    }

    /// Session machine for this dashboard.
    pub fn machine(
        &self,
        config: &HandshakeConfig,
        backend: Arc<dyn BackendClient>,
    ) -> Result<(AuthSessionMachine, login_handshake::SessionStreams)> {
        Ok(AuthSessionMachine::new(
            config.clone(),
            WindowHost::from_memory(&self.window),
            backend,
        )?)
    }

    /// Write the dashboard's storage back to the state file.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        let entries: BTreeMap<String, String> = self
            .browser
            .storage_snapshot(&self.origin)
            .into_iter()
            .filter(|(key, _)| StorageKeys::is_handshake_key(key))
            .collect();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&entries)?;
        if let Err(e) = std::fs::write(path, content) {
            warn!(path = %path.display(), error = %e, "Failed to save dashboard storage");
            return Err(e.into());
        }
        debug!(path = %path.display(), keys = entries.len(), "Dashboard storage saved");
        Ok(())
    }
}

/// HTTP client for the configured backend.
pub(crate) fn http_backend(config: &HandshakeConfig) -> Result<Arc<dyn BackendClient>> {
    let client = HttpBackendClient::new(&config.backend_url, config.request_timeout())
        .context("failed to create backend client")?;
    Ok(Arc::new(client))
}
