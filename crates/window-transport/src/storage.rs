//! Storage-event fallback transport.

use crate::channel::{ChannelKind, EnvelopeCallback, RawEnvelope, TransportChannel};
use crate::host::SharedStorage;
use crate::TransportResult;
use handshake_protocol::WireMessage;
use std::sync::Arc;

/// Default key written by the storage fallback.
pub const DEFAULT_STORAGE_KEY: &str = "pett-auth:handshake";

/// Writes each message to one shared-storage key. Other same-origin windows
/// see the write as a `storage` event.
///
/// Every message carries a fresh `sentAt`, so consecutive writes always
/// change the value and always fire an event.
pub struct StorageTransport {
    storage: Arc<dyn SharedStorage>,
    key: String,
}

impl StorageTransport {
    pub fn new(storage: Arc<dyn SharedStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl TransportChannel for StorageTransport {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Storage
    }

    fn is_available(&self) -> bool {
        true
    }

    fn send(&self, message: &WireMessage) -> TransportResult<()> {
        let data = message.encode()?;
        self.storage.set(&self.key, &data)?;
        Ok(())
    }

    fn on_receive(&self, callback: EnvelopeCallback) -> TransportResult<()> {
        let key = self.key.clone();
        self.storage.subscribe(Box::new(move |event| {
            if event.key != key {
                return;
            }
            // Removals carry no message.
            if let Some(data) = event.new_value {
                callback(RawEnvelope {
                    channel: ChannelKind::Storage,
                    origin: None,
                    data,
                })
            }
        }))?;
        Ok(())
    }
}
