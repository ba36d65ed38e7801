//! Host seams: the browser capabilities the handshake depends on.
//!
//! A real host (wasm bindings, a webview bridge) implements these traits over
//! the actual `window`, `BroadcastChannel` and `localStorage` objects.
//! [`crate::MemoryBrowser`] implements them in-process.

use crate::HostResult;
use handshake_protocol::Origin;
use std::sync::Arc;
use url::Url;

/// A `message` event delivered to a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMessage {
    /// Serialized origin of the sending window (`MessageEvent.origin`).
    pub origin: String,
    pub data: String,
}

/// A `storage` event: another same-origin window changed a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
}

pub type HostMessageCallback = Box<dyn Fn(HostMessage) + Send + Sync>;
pub type BroadcastCallback = Box<dyn Fn(String) + Send + Sync>;
pub type StorageCallback = Box<dyn Fn(StorageEvent) + Send + Sync>;

/// Reference to another window (a `WindowProxy`).
///
/// The window behind the reference may close at any time. Implementations
/// must not keep it alive, and every method tolerates it being gone.
pub trait WindowRef: Send + Sync {
    /// Window name given at `window.open` time.
    fn name(&self) -> &str;

    /// Whether the window has closed (or been dropped).
    fn is_closed(&self) -> bool;

    /// Request closure. Fails if already closed.
    fn close(&self) -> HostResult<()>;

    /// `postMessage(data, targetOrigin)`.
    ///
    /// The host drops the message when `target_origin` is not `*` and does
    /// not match the target window's current origin. Returns whether the
    /// message was dispatched to the window.
    fn post_message(&self, data: &str, target_origin: &str) -> HostResult<bool>;

    /// Origin of the window's current location.
    ///
    /// Fails with `CrossOrigin` when the window is on another origin.
    fn location_origin(&self) -> HostResult<Origin>;
}

/// The running window itself.
pub trait WindowContext: Send + Sync {
    /// Origin of this window's location.
    fn origin(&self) -> Origin;

    /// Full location URL.
    fn location(&self) -> Url;

    /// `document.referrer`, if any.
    fn referrer(&self) -> Option<String>;

    /// `window.opener`, if this window was opened by another and the
    /// reference was not severed.
    fn opener(&self) -> Option<Arc<dyn WindowRef>>;

    /// `window.open(url, name, features)`. Returns `None` when blocked.
    fn open(&self, url: &Url, name: &str, features: &str) -> Option<Arc<dyn WindowRef>>;

    /// Register a `message` event listener.
    fn on_message(&self, callback: HostMessageCallback);

    /// `window.close()` on this window.
    fn close(&self);
}

/// A named same-origin broadcast bus (`BroadcastChannel`), as seen by one window.
///
/// Published messages reach every other subscriber on the same channel name
/// and origin, never the publisher itself.
pub trait BroadcastBus: Send + Sync {
    fn subscribe(&self, channel: &str, callback: BroadcastCallback) -> HostResult<()>;

    fn publish(&self, channel: &str, data: &str) -> HostResult<()>;
}

/// Origin-scoped shared storage (`localStorage`), as seen by one window.
///
/// Writes fire [`StorageEvent`]s in every *other* window of the same origin.
pub trait SharedStorage: Send + Sync {
    /// Store a value
    fn set(&self, key: &str, value: &str) -> HostResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> HostResult<Option<String>>;

    /// Delete a value. Returns whether a value was present.
    fn delete(&self, key: &str) -> HostResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> HostResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// List all keys that start with a given prefix.
    fn list_keys_with_prefix(&self, prefix: &str) -> HostResult<Vec<String>>;

    /// Register a listener for changes made by other windows.
    fn subscribe(&self, callback: StorageCallback) -> HostResult<()>;
}
