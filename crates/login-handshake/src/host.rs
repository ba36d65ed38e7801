//! Capabilities of the window a machine runs in.

use std::sync::Arc;
use window_transport::{BroadcastBus, MemoryWindow, SharedStorage, WindowContext};

/// The host capabilities one window gives the handshake.
#[derive(Clone)]
pub struct WindowHost {
    pub window: Arc<dyn WindowContext>,
    pub broadcast: Arc<dyn BroadcastBus>,
    pub storage: Arc<dyn SharedStorage>,
}

impl WindowHost {
    pub fn new(
        window: Arc<dyn WindowContext>,
        broadcast: Arc<dyn BroadcastBus>,
        storage: Arc<dyn SharedStorage>,
    ) -> Self {
        Self {
            window,
            broadcast,
            storage,
        }
    }

    /// Host backed by a window of a [`window_transport::MemoryBrowser`].
    pub fn from_memory(window: &MemoryWindow) -> Self {
        Self::new(Arc::new(window.clone()), window.broadcast(), window.storage())
    }
}
