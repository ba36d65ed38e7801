//! Direct window messaging (`postMessage`).

use crate::channel::{ChannelKind, EnvelopeCallback, RawEnvelope, TransportChannel};
use crate::host::{WindowContext, WindowRef};
use crate::{TransportError, TransportResult};
use handshake_protocol::{OriginAliasSet, WireMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// Point-to-point channel between a window and its peer (opener or popup).
///
/// Outbound messages are posted once per origin in the sender's alias set,
/// so they are only ever delivered to a window on one of those origins.
pub struct DirectTransport {
    window: Arc<dyn WindowContext>,
    peer: Mutex<Option<Arc<dyn WindowRef>>>,
    targets: Mutex<OriginAliasSet>,
}

impl DirectTransport {
    pub fn new(window: Arc<dyn WindowContext>, targets: OriginAliasSet) -> Self {
        Self {
            window,
            peer: Mutex::new(None),
            targets: Mutex::new(targets),
        }
    }

    /// Popup side: the peer is the opener, if there is one.
    pub fn to_opener(window: Arc<dyn WindowContext>, targets: OriginAliasSet) -> Self {
        let transport = Self::new(window.clone(), targets);
        *transport.peer.lock() = window.opener();
        transport
    }

    pub fn set_peer(&self, peer: Option<Arc<dyn WindowRef>>) {
        *self.peer.lock() = peer;
    }

    pub fn set_targets(&self, targets: OriginAliasSet) {
        *self.targets.lock() = targets;
    }

    fn live_peer(&self) -> Option<Arc<dyn WindowRef>> {
        self.peer.lock().clone().filter(|p| !p.is_closed())
    }
}

impl TransportChannel for DirectTransport {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Direct
    }

    fn is_available(&self) -> bool {
        self.live_peer().is_some()
    }

    fn send(&self, message: &WireMessage) -> TransportResult<()> {
        let peer = self.live_peer().ok_or(TransportError::PeerUnavailable)?;
        let data = message.encode()?;
        let targets: Vec<String> = self.targets.lock().iter().map(|o| o.to_string()).collect();

        let mut matched = 0;
        for target in &targets {
            if peer.post_message(&data, target)? {
                matched += 1;
            }
        }
        if matched == 0 {
            return Err(TransportError::NoMatchingTarget(targets.len()));
        }
        trace!(peer = %peer.name(), targets = targets.len(), matched, "Direct message posted");
        Ok(())
    }

    fn on_receive(&self, callback: EnvelopeCallback) -> TransportResult<()> {
        self.window.on_message(Box::new(move |message| {
            callback(RawEnvelope {
                channel: ChannelKind::Direct,
                origin: Some(message.origin),
                data: message.data,
            })
        }));
        Ok(())
    }
}
