//! In-process browser model.
//!
//! `MemoryBrowser` implements the host seams for any number of windows living
//! in one process. It models the browser rules the handshake relies on:
//!
//! - `postMessage` is only delivered when the target origin matches
//! - `BroadcastChannel` messages reach same-origin subscribers, never the sender
//! - `storage` events fire in the *other* same-origin windows, and storage
//!   has a byte quota
//! - reading a cross-origin window's location fails
//! - window references do not keep windows alive, and closed windows stop
//!   receiving anything
//!
//! Delivery is synchronous. No internal lock is held while a listener runs.

use crate::host::{
    BroadcastBus, BroadcastCallback, HostMessage, HostMessageCallback, SharedStorage,
    StorageCallback, StorageEvent, WindowContext, WindowRef,
};
use crate::{HostError, HostResult, TransportResult};
use handshake_protocol::{Origin, ProtocolError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use url::Url;

/// Default per-origin storage quota (5 MiB, as in common browsers).
pub const DEFAULT_STORAGE_QUOTA: usize = 5 * 1024 * 1024;

type WindowId = u64;

struct WindowState {
    id: WindowId,
    name: String,
    location: Mutex<(Url, Origin)>,
    referrer: Option<String>,
    opener: Mutex<Option<Weak<WindowState>>>,
    closed: AtomicBool,
    listeners: Mutex<Vec<Arc<HostMessageCallback>>>,
}

impl WindowState {
    fn origin(&self) -> Origin {
        self.location.lock().1.clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct BroadcastSubscription {
    window: WindowId,
    origin: Origin,
    channel: String,
    callback: Arc<BroadcastCallback>,
}

struct StorageSubscription {
    window: WindowId,
    origin: Origin,
    callback: Arc<StorageCallback>,
}

struct BrowserInner {
    next_id: AtomicU64,
    windows: Mutex<Vec<Arc<WindowState>>>,
    broadcast_subs: Mutex<Vec<BroadcastSubscription>>,
    storage: Mutex<HashMap<Origin, BTreeMap<String, String>>>,
    storage_subs: Mutex<Vec<StorageSubscription>>,
    storage_quota: usize,
    popups_blocked: AtomicBool,
    opened_watchers: Mutex<Vec<mpsc::UnboundedSender<MemoryWindow>>>,
}

impl BrowserInner {
    fn register(
        &self,
        url: Url,
        name: Option<String>,
        referrer: Option<String>,
        opener: Option<Weak<WindowState>>,
    ) -> TransportResult<Arc<WindowState>> {
        let origin = Origin::from_url(&url)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(WindowState {
            id,
            name: name.unwrap_or_else(|| format!("window-{}", id)),
            location: Mutex::new((url, origin)),
            referrer,
            opener: Mutex::new(opener),
            closed: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        });
        self.windows.lock().push(state.clone());
        Ok(state)
    }

    fn close_window(&self, state: &WindowState) {
        if state.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.windows.lock().retain(|w| w.id != state.id);
        self.broadcast_subs.lock().retain(|s| s.window != state.id);
        self.storage_subs.lock().retain(|s| s.window != state.id);
        state.listeners.lock().clear();
        debug!(window = %state.name, "Window closed");
    }

    fn notify_opened(&self, window: MemoryWindow) {
        self.opened_watchers
            .lock()
            .retain(|tx| tx.send(window.clone()).is_ok());
    }
}

/// An in-process browser holding windows, broadcast buses and storage areas.
#[derive(Clone)]
pub struct MemoryBrowser {
    inner: Arc<BrowserInner>,
}

impl Default for MemoryBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBrowser {
    pub fn new() -> Self {
        Self::with_storage_quota(DEFAULT_STORAGE_QUOTA)
    }

    /// Create a browser whose storage areas hold at most `quota` bytes per origin.
    pub fn with_storage_quota(quota: usize) -> Self {
        Self {
            inner: Arc::new(BrowserInner {
                next_id: AtomicU64::new(1),
                windows: Mutex::new(Vec::new()),
                broadcast_subs: Mutex::new(Vec::new()),
                storage: Mutex::new(HashMap::new()),
                storage_subs: Mutex::new(Vec::new()),
                storage_quota: quota,
                popups_blocked: AtomicBool::new(false),
                opened_watchers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Open a top-level window (a tab or an embedded webview) with no opener.
    pub fn create_window(&self, url: &str, referrer: Option<&str>) -> TransportResult<MemoryWindow> {
        let url = Url::parse(url).map_err(ProtocolError::from)?;
        let state = self
            .inner
            .register(url, None, referrer.map(str::to_string), None)?;
        Ok(MemoryWindow {
            browser: self.inner.clone(),
            state,
        })
    }

    /// Simulate a popup blocker: while set, `window.open` returns `None`.
    pub fn set_popups_blocked(&self, blocked: bool) {
        self.inner.popups_blocked.store(blocked, Ordering::SeqCst);
    }

    /// Find an open window by name.
    pub fn window_named(&self, name: &str) -> Option<MemoryWindow> {
        self.inner
            .windows
            .lock()
            .iter()
            .find(|w| w.name == name)
            .map(|state| MemoryWindow {
                browser: self.inner.clone(),
                state: state.clone(),
            })
    }

    /// Number of windows that have not been closed.
    pub fn open_window_count(&self) -> usize {
        self.inner.windows.lock().len()
    }

    /// Receive every window subsequently opened through `window.open`.
    pub fn watch_opened(&self) -> mpsc::UnboundedReceiver<MemoryWindow> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.opened_watchers.lock().push(tx);
        rx
    }

    /// Current contents of an origin's storage area.
    pub fn storage_snapshot(&self, origin: &Origin) -> BTreeMap<String, String> {
        self.inner
            .storage
            .lock()
            .get(origin)
            .cloned()
            .unwrap_or_default()
    }
}

/// Handle to one window of a [`MemoryBrowser`].
#[derive(Clone)]
pub struct MemoryWindow {
    browser: Arc<BrowserInner>,
    state: Arc<WindowState>,
}

impl MemoryWindow {
    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Navigate to another URL (possibly on another origin).
    pub fn navigate(&self, url: &str) -> TransportResult<()> {
        let url = Url::parse(url).map_err(ProtocolError::from)?;
        let origin = Origin::from_url(&url)?;
        *self.state.location.lock() = (url, origin);
        Ok(())
    }

    /// `window.opener = null`.
    pub fn sever_opener(&self) {
        *self.state.opener.lock() = None;
    }

    /// This window's view of the broadcast buses.
    pub fn broadcast(&self) -> Arc<MemoryBroadcast> {
        Arc::new(MemoryBroadcast {
            browser: self.browser.clone(),
            window: self.state.clone(),
        })
    }

    /// This window's view of its origin's storage area.
    pub fn storage(&self) -> Arc<MemoryStorage> {
        Arc::new(MemoryStorage {
            browser: self.browser.clone(),
            window: self.state.clone(),
        })
    }

    /// A reference to this window as `accessor` would hold it.
    pub fn reference_from(&self, accessor: &MemoryWindow) -> Arc<dyn WindowRef> {
        Arc::new(MemoryWindowRef {
            browser: Arc::downgrade(&self.browser),
            source: Arc::downgrade(&accessor.state),
            target: Arc::downgrade(&self.state),
            name: self.state.name.clone(),
        })
    }

    fn referrer_for(&self, target: &Origin) -> String {
        let (url, origin) = self.state.location.lock().clone();
        // strict-origin-when-cross-origin
        if &origin == target {
            url.to_string()
        } else {
            format!("{}/", origin)
        }
    }
}

impl WindowContext for MemoryWindow {
    fn origin(&self) -> Origin {
        self.state.origin()
    }

    fn location(&self) -> Url {
        self.state.location.lock().0.clone()
    }

    fn referrer(&self) -> Option<String> {
        self.state.referrer.clone()
    }

    fn opener(&self) -> Option<Arc<dyn WindowRef>> {
        let opener = self.state.opener.lock().clone()?;
        let name = opener.upgrade().map(|s| s.name.clone()).unwrap_or_default();
        Some(Arc::new(MemoryWindowRef {
            browser: Arc::downgrade(&self.browser),
            source: Arc::downgrade(&self.state),
            target: opener,
            name,
        }))
    }

    fn open(&self, url: &Url, name: &str, features: &str) -> Option<Arc<dyn WindowRef>> {
        if self.browser.popups_blocked.load(Ordering::SeqCst) {
            debug!(window = %name, "Popup blocked");
            return None;
        }
        let no_opener = features
            .split(',')
            .any(|f| f.trim().eq_ignore_ascii_case("noopener"));

        let child_origin = match Origin::from_url(url) {
            Ok(origin) => origin,
            Err(e) => {
                warn!(error = %e, "Refusing to open window on non-web URL");
                return None;
            }
        };
        let referrer = self.referrer_for(&child_origin);
        let opener = (!no_opener).then(|| Arc::downgrade(&self.state));

        let state = match self.browser.register(
            url.clone(),
            Some(name.to_string()),
            Some(referrer),
            opener,
        ) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Failed to open window");
                return None;
            }
        };
        debug!(window = %name, url = %url, "Window opened");

        let child = MemoryWindow {
            browser: self.browser.clone(),
            state,
        };
        self.browser.notify_opened(child.clone());

        // `noopener` makes window.open return null even though the window opened.
        if no_opener {
            return None;
        }
        Some(child.reference_from(self))
    }

    fn on_message(&self, callback: HostMessageCallback) {
        if self.state.is_closed() {
            return;
        }
        self.state.listeners.lock().push(Arc::new(callback));
    }

    fn close(&self) {
        self.browser.close_window(&self.state);
    }
}

/// A `WindowProxy` held by one window for another.
struct MemoryWindowRef {
    browser: Weak<BrowserInner>,
    source: Weak<WindowState>,
    target: Weak<WindowState>,
    name: String,
}

impl MemoryWindowRef {
    fn live_target(&self) -> HostResult<Arc<WindowState>> {
        self.target
            .upgrade()
            .filter(|t| !t.is_closed())
            .ok_or(HostError::Closed)
    }
}

impl WindowRef for MemoryWindowRef {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_closed(&self) -> bool {
        self.live_target().is_err()
    }

    fn close(&self) -> HostResult<()> {
        let target = self.live_target()?;
        let browser = self.browser.upgrade().ok_or(HostError::Closed)?;
        browser.close_window(&target);
        Ok(())
    }

    fn post_message(&self, data: &str, target_origin: &str) -> HostResult<bool> {
        let target = self.live_target()?;

        if target_origin != "*" {
            let matches = Origin::parse(target_origin)
                .map(|o| o == target.origin())
                .unwrap_or(false);
            if !matches {
                trace!(
                    window = %self.name,
                    target_origin,
                    "postMessage target origin mismatch, dropped"
                );
                return Ok(false);
            }
        }

        let origin = self
            .source
            .upgrade()
            .map(|s| s.origin().to_string())
            .unwrap_or_else(|| "null".to_string());
        let listeners: Vec<_> = target.listeners.lock().iter().cloned().collect();
        for listener in listeners {
            listener(HostMessage {
                origin: origin.clone(),
                data: data.to_string(),
            });
        }
        Ok(true)
    }

    fn location_origin(&self) -> HostResult<Origin> {
        let target = self.live_target()?;
        let source = self.source.upgrade().ok_or(HostError::Closed)?;
        let origin = target.origin();
        if origin != source.origin() {
            return Err(HostError::CrossOrigin);
        }
        Ok(origin)
    }
}

/// One window's view of the broadcast buses.
pub struct MemoryBroadcast {
    browser: Arc<BrowserInner>,
    window: Arc<WindowState>,
}

impl BroadcastBus for MemoryBroadcast {
    fn subscribe(&self, channel: &str, callback: BroadcastCallback) -> HostResult<()> {
        if self.window.is_closed() {
            return Err(HostError::Closed);
        }
        self.browser.broadcast_subs.lock().push(BroadcastSubscription {
            window: self.window.id,
            origin: self.window.origin(),
            channel: channel.to_string(),
            callback: Arc::new(callback),
        });
        Ok(())
    }

    fn publish(&self, channel: &str, data: &str) -> HostResult<()> {
        if self.window.is_closed() {
            return Err(HostError::Closed);
        }
        let origin = self.window.origin();
        let targets: Vec<_> = self
            .browser
            .broadcast_subs
            .lock()
            .iter()
            .filter(|s| s.window != self.window.id && s.channel == channel && s.origin == origin)
            .map(|s| s.callback.clone())
            .collect();
        trace!(channel, receivers = targets.len(), "Broadcast published");
        for callback in targets {
            callback(data.to_string());
        }
        Ok(())
    }
}

/// One window's view of its origin's storage area.
pub struct MemoryStorage {
    browser: Arc<BrowserInner>,
    window: Arc<WindowState>,
}

impl MemoryStorage {
    fn notify_others(&self, origin: &Origin, event: StorageEvent) {
        let targets: Vec<_> = self
            .browser
            .storage_subs
            .lock()
            .iter()
            .filter(|s| s.window != self.window.id && &s.origin == origin)
            .map(|s| s.callback.clone())
            .collect();
        for callback in targets {
            callback(event.clone());
        }
    }
}

impl SharedStorage for MemoryStorage {
    fn set(&self, key: &str, value: &str) -> HostResult<()> {
        let origin = self.window.origin();
        let old_value = {
            let mut storage = self.browser.storage.lock();
            let area = storage.entry(origin.clone()).or_default();
            let others: usize = area
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > self.browser.storage_quota {
                return Err(HostError::QuotaExceeded {
                    needed,
                    quota: self.browser.storage_quota,
                });
            }
            area.insert(key.to_string(), value.to_string())
        };

        if old_value.as_deref() != Some(value) {
            self.notify_others(
                &origin,
                StorageEvent {
                    key: key.to_string(),
                    old_value,
                    new_value: Some(value.to_string()),
                },
            );
        }
        Ok(())
    }

    fn get(&self, key: &str) -> HostResult<Option<String>> {
        let origin = self.window.origin();
        Ok(self
            .browser
            .storage
            .lock()
            .get(&origin)
            .and_then(|area| area.get(key).cloned()))
    }

    fn delete(&self, key: &str) -> HostResult<bool> {
        let origin = self.window.origin();
        let old_value = self
            .browser
            .storage
            .lock()
            .get_mut(&origin)
            .and_then(|area| area.remove(key));

        match old_value {
            Some(old_value) => {
                self.notify_others(
                    &origin,
                    StorageEvent {
                        key: key.to_string(),
                        old_value: Some(old_value),
                        new_value: None,
                    },
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list_keys_with_prefix(&self, prefix: &str) -> HostResult<Vec<String>> {
        let origin = self.window.origin();
        Ok(self
            .browser
            .storage
            .lock()
            .get(&origin)
            .map(|area| {
                area.keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn subscribe(&self, callback: StorageCallback) -> HostResult<()> {
        if self.window.is_closed() {
            return Err(HostError::Closed);
        }
        self.browser.storage_subs.lock().push(StorageSubscription {
            window: self.window.id,
            origin: self.window.origin(),
            callback: Arc::new(callback),
        });
        Ok(())
    }
}
