//! Origins and the alias sets used to accept cross-window messages.
//!
//! A popup served from `http://127.0.0.1:8716` and a dashboard opened as
//! `http://localhost:8716` are the same application as far as the handshake is
//! concerned, so both spellings land in one [`OriginAliasSet`].

use crate::{ProtocolError, ProtocolResult};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;
use url::Url;

const LOCALHOST: &str = "localhost";
const LOOPBACK_V4: &str = "127.0.0.1";

/// Scheme, host and port of a window location.
///
/// Default ports are elided, so `https://pett.ai:443` and `https://pett.ai`
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Origin {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl Origin {
    /// Derive the origin of any absolute URL (path, query and fragment are ignored).
    pub fn parse(input: &str) -> ProtocolResult<Self> {
        let url = Url::parse(input.trim())?;
        Self::from_url(&url)
    }

    /// Derive the origin of a parsed URL.
    pub fn from_url(url: &Url) -> ProtocolResult<Self> {
        let scheme = url.scheme().to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ProtocolError::InvalidOrigin(format!(
                "unsupported scheme {:?} in {}",
                scheme, url
            )));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProtocolError::InvalidOrigin(format!("no host in {}", url)))?
            .to_ascii_lowercase();

        Ok(Self {
            scheme,
            host,
            port: url.port(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Same scheme and port on a different host.
    pub fn with_host(&self, host: &str) -> Self {
        Self {
            scheme: self.scheme.clone(),
            host: host.to_ascii_lowercase(),
            port: self.port,
        }
    }

    /// The `localhost` <-> `127.0.0.1` counterpart, if this is a loopback origin.
    pub fn loopback_alias(&self) -> Option<Self> {
        match self.host.as_str() {
            LOCALHOST => Some(self.with_host(LOOPBACK_V4)),
            LOOPBACK_V4 => Some(self.with_host(LOCALHOST)),
            _ => None,
        }
    }

    /// Base URL (`scheme://host[:port]/`) for building paths on this origin.
    pub fn to_url(&self) -> ProtocolResult<Url> {
        Ok(Url::parse(&format!("{}/", self))?)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}://{}:{}", self.scheme, self.host, port),
            None => write!(f, "{}://{}", self.scheme, self.host),
        }
    }
}

impl FromStr for Origin {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Set of origins treated as "self" when validating inbound messages.
///
/// The origin the set was computed for is always a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginAliasSet {
    current: Origin,
    members: BTreeSet<Origin>,
}

impl OriginAliasSet {
    /// Alias set for a single origin, including its loopback counterpart.
    pub fn for_origin(current: Origin) -> Self {
        let mut set = Self {
            members: BTreeSet::new(),
            current: current.clone(),
        };
        set.contribute(current);
        set
    }

    /// Add an origin (and its loopback counterpart) to the set.
    pub fn contribute(&mut self, origin: Origin) {
        if let Some(alias) = origin.loopback_alias() {
            self.members.insert(alias);
        }
        self.members.insert(origin);
    }

    /// The origin this set was computed for.
    pub fn current(&self) -> &Origin {
        &self.current
    }

    pub fn contains(&self, origin: &Origin) -> bool {
        self.members.contains(origin)
    }

    /// Check a raw origin string such as `MessageEvent.origin`.
    ///
    /// Unparseable values (including the opaque `"null"` origin) are never members.
    pub fn accepts(&self, raw: &str) -> bool {
        Origin::parse(raw)
            .map(|origin| self.contains(&origin))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Origin> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Compute the alias set for `current`.
///
/// `referrer` is the raw document referrer. `opener` is the opener's origin
/// when it could be read; a cross-origin opener simply contributes nothing.
pub fn compute_aliases(
    current: &Origin,
    referrer: Option<&str>,
    opener: Option<Origin>,
) -> OriginAliasSet {
    let mut set = OriginAliasSet::for_origin(current.clone());

    if let Some(raw) = referrer.map(str::trim).filter(|r| !r.is_empty()) {
        match Origin::parse(raw) {
            Ok(origin) => set.contribute(origin),
            Err(e) => debug!(error = %e, "Ignoring unparseable referrer"),
        }
    }

    if let Some(origin) = opener {
        set.contribute(origin);
    }

    set
}
