//! Transport channel abstraction.

use crate::TransportResult;
use handshake_protocol::WireMessage;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which carrier a raw event arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// `postMessage` between a window and its opener or popup
    Direct,
    /// Named same-origin broadcast channel
    Broadcast,
    /// `storage` event fallback
    Storage,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Direct => "direct",
            ChannelKind::Broadcast => "broadcast",
            ChannelKind::Storage => "storage",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An undecoded inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEnvelope {
    pub channel: ChannelKind,
    /// Sender origin. Only the direct channel knows it.
    pub origin: Option<String>,
    pub data: String,
}

pub type EnvelopeCallback = Arc<dyn Fn(RawEnvelope) + Send + Sync>;

/// One delivery mechanism for handshake messages.
pub trait TransportChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Whether `send` can currently succeed.
    fn is_available(&self) -> bool;

    /// Deliver a message to the peer side. Fails if the carrier is gone.
    fn send(&self, message: &WireMessage) -> TransportResult<()>;

    /// Register a listener for inbound events.
    fn on_receive(&self, callback: EnvelopeCallback) -> TransportResult<()>;
}

/// Send a message on every channel. Returns how many accepted it.
///
/// Individual failures are expected (a closed opener, a full storage area)
/// and only logged.
pub fn send_all(channels: &[Arc<dyn TransportChannel>], message: &WireMessage) -> usize {
    let mut delivered = 0;
    for channel in channels {
        match channel.send(message) {
            Ok(()) => delivered += 1,
            Err(e) => debug!(
                channel = %channel.kind(),
                message_type = %message.kind,
                error = %e,
                "Channel send failed"
            ),
        }
    }

    if delivered == 0 {
        warn!(
            message_type = %message.kind,
            channels = channels.len(),
            "Message was not accepted by any channel"
        );
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportError;
    use parking_lot::Mutex;

    struct FakeChannel {
        kind: ChannelKind,
        fail: bool,
        sent: Mutex<Vec<String>>,
    }

    impl TransportChannel for FakeChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        fn is_available(&self) -> bool {
            !self.fail
        }

        fn send(&self, message: &WireMessage) -> TransportResult<()> {
            if self.fail {
                return Err(TransportError::PeerUnavailable);
            }
            self.sent.lock().push(message.kind.clone());
            Ok(())
        }

        fn on_receive(&self, _callback: EnvelopeCallback) -> TransportResult<()> {
            Ok(())
        }
    }

    fn fake(kind: ChannelKind, fail: bool) -> Arc<FakeChannel> {
        Arc::new(FakeChannel {
            kind,
            fail,
            sent: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_send_all_attempts_every_channel() {
        let direct = fake(ChannelKind::Direct, true);
        let broadcast = fake(ChannelKind::Broadcast, false);
        let storage = fake(ChannelKind::Storage, false);
        let channels: Vec<Arc<dyn TransportChannel>> =
            vec![direct.clone(), broadcast.clone(), storage.clone()];

        let message = WireMessage {
            kind: "privy-popup-closed".to_string(),
            sent_at: Some(1),
            ..Default::default()
        };
        assert_eq!(send_all(&channels, &message), 2);
        assert_eq!(broadcast.sent.lock().len(), 1);
        assert_eq!(storage.sent.lock().len(), 1);
    }

    #[test]
    fn test_send_all_with_no_channels_reports_zero() {
        assert_eq!(send_all(&[], &WireMessage::default()), 0);
    }
}
