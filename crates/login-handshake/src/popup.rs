//! Popup window lifecycle.

use crate::HandshakeConfig;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;
use window_transport::{WindowContext, WindowRef};

/// Shortest liveness poll; `tokio::time::interval` panics on a zero period.
const MIN_LIVENESS_INTERVAL: Duration = Duration::from_millis(1);

/// Popup window geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupOptions {
    pub width: u32,
    pub height: u32,
}

impl Default for PopupOptions {
    fn default() -> Self {
        Self {
            width: crate::config::DEFAULT_POPUP_WIDTH,
            height: crate::config::DEFAULT_POPUP_HEIGHT,
        }
    }
}

impl From<&HandshakeConfig> for PopupOptions {
    fn from(config: &HandshakeConfig) -> Self {
        Self {
            width: config.popup_width,
            height: config.popup_height,
        }
    }
}

impl PopupOptions {
    /// `window.open` feature string.
    pub fn features(&self) -> String {
        format!("width={},height={},popup=yes", self.width, self.height)
    }
}

/// Reference to an opened popup.
#[derive(Clone)]
pub struct PopupHandle {
    name: String,
    window: Arc<dyn WindowRef>,
}

impl PopupHandle {
    /// Unique window name of this attempt.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.window.is_closed()
    }
}

impl fmt::Debug for PopupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopupHandle")
            .field("name", &self.name)
            .field("closed", &self.window.is_closed())
            .finish()
    }
}

/// Liveness events produced by [`PopupController::watch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupEvent {
    /// The popup closed without the controller closing it.
    Closed { popup_name: String },
}

struct ActivePopup {
    handle: PopupHandle,
    watcher: Option<JoinHandle<()>>,
}

impl ActivePopup {
    fn stop_watching(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// Owns at most one login popup at a time.
pub struct PopupController {
    window: Arc<dyn WindowContext>,
    options: PopupOptions,
    liveness_interval: Duration,
    active: Mutex<Option<ActivePopup>>,
}

impl PopupController {
    pub fn new(
        window: Arc<dyn WindowContext>,
        options: PopupOptions,
        liveness_interval: Duration,
    ) -> Self {
        if liveness_interval < MIN_LIVENESS_INTERVAL {
            warn!(
                interval_ms = liveness_interval.as_millis() as u64,
                "Liveness interval too short, using the minimum"
            );
        }
        Self {
            window,
            options,
            liveness_interval: liveness_interval.max(MIN_LIVENESS_INTERVAL),
            active: Mutex::new(None),
        }
    }

    /// Open a freshly named popup at `url`, closing any previous one.
    ///
    /// Returns `None` when the host blocked the popup.
    pub fn open(&self, url: &Url) -> Option<PopupHandle> {
        self.close_active();

        let name = format!("pett-login-{}", Uuid::new_v4().simple());
        let Some(window) = self.window.open(url, &name, &self.options.features()) else {
            warn!(popup = %name, "Popup was blocked");
            return None;
        };

        let handle = PopupHandle { name, window };
        info!(popup = %handle.name, url = %url, "Login popup opened");
        *self.active.lock() = Some(ActivePopup {
            handle: handle.clone(),
            watcher: None,
        });
        Some(handle)
    }

    pub fn is_alive(&self, handle: &PopupHandle) -> bool {
        !handle.is_closed()
    }

    /// Close `handle`. Errors from an already closed or cross-origin window are ignored.
    pub fn close(&self, handle: &PopupHandle) {
        {
            let mut active = self.active.lock();
            if active.as_ref().map(|a| a.handle.name.as_str()) == Some(handle.name.as_str()) {
                if let Some(mut popup) = active.take() {
                    popup.stop_watching();
                }
            }
        }
        close_window(handle);
    }

    /// Close the current popup, if any.
    pub fn close_active(&self) {
        let previous = self.active.lock().take();
        if let Some(mut popup) = previous {
            popup.stop_watching();
            close_window(&popup.handle);
        }
    }

    pub fn active(&self) -> Option<PopupHandle> {
        self.active.lock().as_ref().map(|a| a.handle.clone())
    }

    /// Drop bookkeeping for a popup that is already gone.
    pub fn forget(&self, popup_name: &str) {
        let mut active = self.active.lock();
        if active.as_ref().map(|a| a.handle.name.as_str()) == Some(popup_name) {
            if let Some(mut popup) = active.take() {
                popup.stop_watching();
            }
        }
    }

    /// Poll `handle` until it closes, then emit one [`PopupEvent::Closed`].
    ///
    /// Must be called inside a tokio runtime. The poll stops early if the
    /// popup is replaced or closed through the controller.
    pub fn watch(&self, handle: &PopupHandle, sink: mpsc::UnboundedSender<PopupEvent>) {
        let watched = handle.clone();
        let period = self.liveness_interval;
        let watcher = tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                if watched.is_closed() {
                    debug!(popup = %watched.name, "Popup closed");
                    let _ = sink.send(PopupEvent::Closed {
                        popup_name: watched.name.clone(),
                    });
                    break;
                }
            }
        });

        let mut active = self.active.lock();
        match active.as_mut() {
            Some(popup) if popup.handle.name == handle.name => {
                popup.stop_watching();
                popup.watcher = Some(watcher);
            }
            _ => watcher.abort(),
        }
    }
}

fn close_window(handle: &PopupHandle) {
    if handle.is_closed() {
        return;
    }
    if let Err(e) = handle.window.close() {
        debug!(popup = %handle.name, error = %e, "Ignoring popup close failure");
    }
}

impl Drop for PopupController {
    fn drop(&mut self) {
        if let Some(mut popup) = self.active.get_mut().take() {
            popup.stop_watching();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use window_transport::{MemoryBrowser, MemoryWindow};

    fn controller(parent: &MemoryWindow) -> PopupController {
        PopupController::new(
            Arc::new(parent.clone()),
            PopupOptions::default(),
            Duration::from_millis(10),
        )
    }

    fn login_url() -> Url {
        Url::parse("http://localhost:8716/privy-login").unwrap()
    }

    #[tokio::test]
    async fn test_open_uses_fresh_name_and_closes_previous() {
        let browser = MemoryBrowser::new();
        let parent = browser.create_window("http://localhost:8716/", None).unwrap();
        let popups = controller(&parent);

        let first = popups.open(&login_url()).unwrap();
        let second = popups.open(&login_url()).unwrap();

        assert_ne!(first.name(), second.name());
        assert!(first.name().starts_with("pett-login-"));
        assert!(!popups.is_alive(&first));
        assert!(popups.is_alive(&second));
        assert_eq!(popups.active().unwrap().name(), second.name());
    }

    #[tokio::test]
    async fn test_blocked_popup_returns_none() {
        let browser = MemoryBrowser::new();
        let parent = browser.create_window("http://localhost:8716/", None).unwrap();
        browser.set_popups_blocked(true);
        let popups = controller(&parent);

        assert!(popups.open(&login_url()).is_none());
        assert!(popups.active().is_none());
    }

    #[tokio::test]
    async fn test_watch_reports_user_closure_once() {
        let browser = MemoryBrowser::new();
        let parent = browser.create_window("http://localhost:8716/", None).unwrap();
        let popups = controller(&parent);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = popups.open(&login_url()).unwrap();
        popups.watch(&handle, tx);
        browser.window_named(handle.name()).unwrap().close();

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            PopupEvent::Closed {
                popup_name: handle.name().to_string()
            }
        );
        // Sender dropped by the finished watcher.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_zero_interval_still_reports_closure() {
        let browser = MemoryBrowser::new();
        let parent = browser.create_window("http://localhost:8716/", None).unwrap();
        let popups = PopupController::new(
            Arc::new(parent.clone()),
            PopupOptions::default(),
            Duration::ZERO,
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = popups.open(&login_url()).unwrap();
        popups.watch(&handle, tx);
        browser.window_named(handle.name()).unwrap().close();

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(PopupEvent::Closed { .. })));
    }

    #[tokio::test]
    async fn test_deliberate_close_stops_watcher() {
        let browser = MemoryBrowser::new();
        let parent = browser.create_window("http://localhost:8716/", None).unwrap();
        let popups = controller(&parent);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = popups.open(&login_url()).unwrap();
        popups.watch(&handle, tx);
        popups.close(&handle);
        assert!(handle.is_closed());
        assert!(popups.active().is_none());

        let outcome = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(matches!(outcome, Ok(None)));
    }

    #[tokio::test]
    async fn test_close_tolerates_closed_window() {
        let browser = MemoryBrowser::new();
        let parent = browser.create_window("http://localhost:8716/", None).unwrap();
        let popups = controller(&parent);

        let handle = popups.open(&login_url()).unwrap();
        browser.window_named(handle.name()).unwrap().close();
        popups.close(&handle);
        popups.close(&handle);
        assert!(!popups.is_alive(&handle));
    }

    #[test]
    fn test_features_string() {
        let options = PopupOptions {
            width: 480,
            height: 720,
        };
        assert_eq!(options.features(), "width=480,height=720,popup=yes");
    }
}
