//! Popup launch parameters.
//!
//! The parent encodes these into the popup URL query; the popup parses them
//! back on startup.

use crate::ProtocolResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

pub const FORCE_LOGOUT_PARAM: &str = "forceLogout";
pub const RESET_SEQ_PARAM: &str = "resetSeq";
pub const CONTEXT_PARAM: &str = "context";

/// Execution context the popup runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostContext {
    /// Plain browser tab opened with `window.open`.
    #[default]
    Browser,
    /// Embedded in a native shell; no usable opener.
    Iframe,
    /// Electron-hosted webview.
    Electron,
}

impl HostContext {
    pub fn as_str(self) -> &'static str {
        match self {
            HostContext::Browser => "browser",
            HostContext::Iframe => "iframe",
            HostContext::Electron => "electron",
        }
    }

    /// Whether a direct opener reference is expected to exist.
    pub fn expects_opener(self) -> bool {
        matches!(self, HostContext::Browser)
    }
}

impl fmt::Display for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "browser" => Ok(HostContext::Browser),
            "iframe" => Ok(HostContext::Iframe),
            "electron" => Ok(HostContext::Electron),
            other => Err(format!("unknown host context: {}", other)),
        }
    }
}

/// Query parameters understood by the popup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchParams {
    pub force_logout: bool,
    pub reset_seq: Option<u64>,
    pub context: HostContext,
}

impl LaunchParams {
    /// Parse from a popup URL. Unknown or malformed values fall back to defaults.
    pub fn from_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                FORCE_LOGOUT_PARAM => {
                    let v = value.trim();
                    params.force_logout = v == "1" || v.eq_ignore_ascii_case("true");
                }
                RESET_SEQ_PARAM => params.reset_seq = value.trim().parse().ok(),
                CONTEXT_PARAM => params.context = value.parse().unwrap_or_default(),
                _ => {}
            }
        }
        params
    }

    /// Parse from a raw URL string.
    pub fn parse(raw: &str) -> ProtocolResult<Self> {
        Ok(Self::from_url(&Url::parse(raw)?))
    }

    /// Whether the popup must drop an existing identity session.
    ///
    /// A forced logout with a sequence applies only when the sequence is
    /// strictly greater than the last one handled. Without a sequence it
    /// applies every time.
    pub fn requires_logout(&self, last_handled: Option<u64>) -> bool {
        if !self.force_logout {
            return false;
        }
        match (self.reset_seq, last_handled) {
            (Some(seq), Some(handled)) => seq > handled,
            _ => true,
        }
    }
}

/// Append launch parameters to the popup base URL.
///
/// `forceLogout`/`resetSeq` are only written when a logout is being forced;
/// `context` is written only when it is not the default browser context.
pub fn build_launch_url(base: &Url, params: &LaunchParams) -> Url {
    let mut url = base.clone();
    {
        let mut query = url.query_pairs_mut();
        if params.force_logout {
            query.append_pair(FORCE_LOGOUT_PARAM, "1");
            if let Some(seq) = params.reset_seq {
                query.append_pair(RESET_SEQ_PARAM, &seq.to_string());
            }
        }
        if params.context != HostContext::Browser {
            query.append_pair(CONTEXT_PARAM, params.context.as_str());
        }
    }
    // Avoid a dangling `?` when nothing was appended.
    if url.query() == Some("") {
        url.set_query(None);
    }
    url
}
