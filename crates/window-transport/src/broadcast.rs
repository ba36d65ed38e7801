//! Named broadcast channel transport.

use crate::channel::{ChannelKind, EnvelopeCallback, RawEnvelope, TransportChannel};
use crate::host::BroadcastBus;
use crate::TransportResult;
use handshake_protocol::WireMessage;
use std::sync::Arc;

/// Default broadcast channel name shared by the dashboard and the popup.
pub const DEFAULT_BROADCAST_CHANNEL: &str = "pett-auth";

/// Reaches every same-origin window on the named channel without a window handle.
pub struct BroadcastTransport {
    bus: Arc<dyn BroadcastBus>,
    name: String,
}

impl BroadcastTransport {
    pub fn new(bus: Arc<dyn BroadcastBus>, name: impl Into<String>) -> Self {
        Self {
            bus,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl TransportChannel for BroadcastTransport {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Broadcast
    }

    fn is_available(&self) -> bool {
        true
    }

    fn send(&self, message: &WireMessage) -> TransportResult<()> {
        let data = message.encode()?;
        self.bus.publish(&self.name, &data)?;
        Ok(())
    }

    fn on_receive(&self, callback: EnvelopeCallback) -> TransportResult<()> {
        self.bus.subscribe(
            &self.name,
            Box::new(move |data| {
                callback(RawEnvelope {
                    channel: ChannelKind::Broadcast,
                    origin: None,
                    data,
                })
            }),
        )?;
        Ok(())
    }
}
