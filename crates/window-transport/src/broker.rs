//! Message broker: origin validation, deduplication and normalization.
//!
//! Every transport channel feeds raw envelopes into one broker. The broker
//! emits at most one [`ProtocolMessage`] per logical event on an mpsc
//! channel consumed by the session machine.
//!
//! ## Pipeline
//!
//! ```text
//! RawEnvelope ──► origin check (direct only) ──► decode ──► normalize ──► dedup ──► mpsc
//!                     │ reject                    │ drop      │ drop        │ drop
//!                     ▼                           ▼           ▼             ▼
//!                  (silent)                    (debug)     (debug)       (trace)
//! ```

use crate::channel::{ChannelKind, RawEnvelope, TransportChannel};
use crate::TransportResult;
use handshake_protocol::{MessageKind, OriginAliasSet, ProtocolMessage, WireMessage};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// How many explicit message ids the seen log remembers.
pub const DEFAULT_SEEN_ID_CAPACITY: usize = 128;

/// Bounded record of what has already been processed.
///
/// Tracks the highest `sentAt` per message kind and a FIFO window of
/// explicit idempotency ids.
#[derive(Debug)]
pub struct SeenMessageLog {
    last_sent_at: HashMap<MessageKind, u64>,
    ids: HashSet<String>,
    id_order: VecDeque<String>,
    id_capacity: usize,
}

impl Default for SeenMessageLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SEEN_ID_CAPACITY)
    }
}

impl SeenMessageLog {
    pub fn with_capacity(id_capacity: usize) -> Self {
        Self {
            last_sent_at: HashMap::new(),
            ids: HashSet::new(),
            id_order: VecDeque::new(),
            id_capacity: id_capacity.max(1),
        }
    }

    /// Record a message. Returns `false` if it is a duplicate.
    ///
    /// A message is a duplicate if its id was seen, or if its `sentAt` is not
    /// strictly greater than the last accepted one of the same kind.
    pub fn observe(&mut self, kind: MessageKind, sent_at: u64, id: Option<&str>) -> bool {
        if let Some(id) = id {
            if self.ids.contains(id) {
                return false;
            }
        }
        if let Some(&last) = self.last_sent_at.get(&kind) {
            if sent_at <= last {
                return false;
            }
        }

        self.last_sent_at.insert(kind, sent_at);
        if let Some(id) = id {
            self.remember_id(id);
        }
        true
    }

    fn remember_id(&mut self, id: &str) {
        if self.id_order.len() >= self.id_capacity {
            if let Some(oldest) = self.id_order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.ids.insert(id.to_string());
        self.id_order.push_back(id.to_string());
    }

    pub fn last_sent_at(&self, kind: MessageKind) -> Option<u64> {
        self.last_sent_at.get(&kind).copied()
    }

    pub fn id_count(&self) -> usize {
        self.ids.len()
    }

    pub fn clear(&mut self) {
        self.last_sent_at.clear();
        self.ids.clear();
        self.id_order.clear();
    }
}

struct BrokerInner {
    allowlist: Mutex<OriginAliasSet>,
    seen: Mutex<SeenMessageLog>,
    output: mpsc::UnboundedSender<ProtocolMessage>,
}

/// Fan-in point for every transport channel.
#[derive(Clone)]
pub struct MessageBroker {
    inner: Arc<BrokerInner>,
}

impl MessageBroker {
    /// Create a broker and the receiver for its normalized output.
    pub fn new(allowlist: OriginAliasSet) -> (Self, mpsc::UnboundedReceiver<ProtocolMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let broker = Self {
            inner: Arc::new(BrokerInner {
                allowlist: Mutex::new(allowlist),
                seen: Mutex::new(SeenMessageLog::default()),
                output: tx,
            }),
        };
        (broker, rx)
    }

    /// Route a channel's inbound events through this broker.
    pub fn attach(&self, channel: &dyn TransportChannel) -> TransportResult<()> {
        let broker = self.clone();
        channel.on_receive(Arc::new(move |envelope| {
            broker.ingest(envelope);
        }))?;
        debug!(channel = %channel.kind(), "Channel attached to broker");
        Ok(())
    }

    /// Process one raw event. Returns the message if it was emitted.
    pub fn ingest(&self, envelope: RawEnvelope) -> Option<ProtocolMessage> {
        if envelope.channel == ChannelKind::Direct {
            let accepted = envelope
                .origin
                .as_deref()
                .map(|origin| self.inner.allowlist.lock().accepts(origin))
                .unwrap_or(false);
            if !accepted {
                return None;
            }
        }

        let wire = match WireMessage::decode(&envelope.data) {
            Ok(wire) => wire,
            Err(e) => {
                debug!(channel = %envelope.channel, error = %e, "Dropping undecodable message");
                return None;
            }
        };
        let message = match ProtocolMessage::from_wire(&wire) {
            Ok(message) => message,
            Err(e) => {
                debug!(channel = %envelope.channel, error = %e, "Dropping unrecognized message");
                return None;
            }
        };

        let fresh = self
            .inner
            .seen
            .lock()
            .observe(message.kind(), message.sent_at(), wire.id.as_deref());
        if !fresh {
            trace!(
                channel = %envelope.channel,
                kind = ?message.kind(),
                sent_at = message.sent_at(),
                "Duplicate message dropped"
            );
            return None;
        }

        debug!(
            channel = %envelope.channel,
            kind = ?message.kind(),
            sent_at = message.sent_at(),
            "Message accepted"
        );
        if self.inner.output.send(message.clone()).is_err() {
            debug!("Broker output receiver dropped");
        }
        Some(message)
    }

    /// Forget everything seen so far. Called at the start of each login attempt.
    pub fn reset(&self) {
        self.inner.seen.lock().clear();
    }

    /// Replace the set of origins accepted on the direct channel.
    pub fn update_allowlist(&self, allowlist: OriginAliasSet) {
        *self.inner.allowlist.lock() = allowlist;
    }

    pub fn allowlist(&self) -> OriginAliasSet {
        self.inner.allowlist.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BroadcastTransport, MemoryBrowser, StorageTransport, WindowContext};
    use handshake_protocol::{compute_aliases, Origin};

    fn allowlist() -> OriginAliasSet {
        compute_aliases(&Origin::parse("http://localhost:8716").unwrap(), None, None)
    }

    fn token_json(sent_at: u64) -> String {
        format!(r#"{{"type":"privy-token","token":"tok","sentAt":{}}}"#, sent_at)
    }

    fn envelope(channel: ChannelKind, origin: Option<&str>, data: String) -> RawEnvelope {
        RawEnvelope {
            channel,
            origin: origin.map(str::to_string),
            data,
        }
    }

    #[test]
    fn test_identical_token_on_two_channels_emits_once() {
        let (broker, mut rx) = MessageBroker::new(allowlist());

        let first = broker.ingest(envelope(
            ChannelKind::Direct,
            Some("http://127.0.0.1:8716"),
            token_json(1000),
        ));
        let second = broker.ingest(envelope(ChannelKind::Broadcast, None, token_json(1000)));

        assert!(first.is_some());
        assert!(second.is_none());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_direct_message_from_foreign_origin_is_dropped() {
        let (broker, mut rx) = MessageBroker::new(allowlist());

        assert!(broker
            .ingest(envelope(
                ChannelKind::Direct,
                Some("https://evil.example"),
                token_json(1)
            ))
            .is_none());
        assert!(broker
            .ingest(envelope(ChannelKind::Direct, None, token_json(2)))
            .is_none());
        assert!(broker
            .ingest(envelope(ChannelKind::Direct, Some("null"), token_json(3)))
            .is_none());
        assert!(rx.try_recv().is_err());

        // Rejection leaves no trace in the seen log.
        assert!(broker
            .ingest(envelope(
                ChannelKind::Direct,
                Some("http://localhost:8716"),
                token_json(1)
            ))
            .is_some());
    }

    #[test]
    fn test_older_or_equal_sent_at_is_duplicate_per_kind() {
        let (broker, _rx) = MessageBroker::new(allowlist());
        let status = |sent_at: u64| {
            format!(
                r#"{{"type":"privy-popup-status","status":"prompting","sentAt":{}}}"#,
                sent_at
            )
        };

        assert!(broker.ingest(envelope(ChannelKind::Broadcast, None, status(10))).is_some());
        assert!(broker.ingest(envelope(ChannelKind::Storage, None, status(10))).is_none());
        assert!(broker.ingest(envelope(ChannelKind::Storage, None, status(9))).is_none());
        // Separate stream per kind.
        assert!(broker.ingest(envelope(ChannelKind::Storage, None, token_json(5))).is_some());
        assert!(broker.ingest(envelope(ChannelKind::Broadcast, None, status(11))).is_some());
    }

    #[test]
    fn test_garbage_is_ignored() {
        let (broker, mut rx) = MessageBroker::new(allowlist());
        for data in [
            "not json",
            "42",
            r#"{"type":"webpackOk"}"#,
            r#"{"type":"privy-token","sentAt":1}"#,
            r#"{"type":"privy-popup-status","status":"bogus","sentAt":1}"#,
        ] {
            assert!(broker
                .ingest(envelope(ChannelKind::Broadcast, None, data.to_string()))
                .is_none());
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reset_allows_replay() {
        let (broker, _rx) = MessageBroker::new(allowlist());
        assert!(broker.ingest(envelope(ChannelKind::Broadcast, None, token_json(7))).is_some());
        assert!(broker.ingest(envelope(ChannelKind::Broadcast, None, token_json(7))).is_none());
        broker.reset();
        assert!(broker.ingest(envelope(ChannelKind::Broadcast, None, token_json(7))).is_some());
    }

    #[test]
    fn test_update_allowlist() {
        let (broker, _rx) = MessageBroker::new(allowlist());
        let origin = Some("https://pett.ai");
        assert!(broker.ingest(envelope(ChannelKind::Direct, origin, token_json(1))).is_none());
        broker.update_allowlist(compute_aliases(
            &Origin::parse("https://pett.ai").unwrap(),
            None,
            None,
        ));
        assert!(broker.ingest(envelope(ChannelKind::Direct, origin, token_json(1))).is_some());
    }

    #[test]
    fn test_seen_log_ids_are_bounded() {
        let mut log = SeenMessageLog::with_capacity(2);
        assert!(log.observe(MessageKind::Closed, 1, Some("a")));
        assert!(!log.observe(MessageKind::ErrorReported, 50, Some("a")));
        assert!(log.observe(MessageKind::Closed, 2, Some("b")));
        assert!(log.observe(MessageKind::Closed, 3, Some("c")));
        assert_eq!(log.id_count(), 2);
        // "a" fell out of the window; only sentAt guards it now.
        assert!(log.observe(MessageKind::ErrorReported, 4, Some("a")));
        assert_eq!(log.last_sent_at(MessageKind::Closed), Some(3));
    }

    #[tokio::test]
    async fn test_attached_channels_feed_one_stream() {
        let browser = MemoryBrowser::new();
        let dashboard = browser.create_window("http://localhost:8716/", None).unwrap();
        let popup = browser.create_window("http://localhost:8716/privy-login", None).unwrap();

        let (broker, mut rx) = MessageBroker::new(compute_aliases(&dashboard.origin(), None, None));
        broker
            .attach(&BroadcastTransport::new(dashboard.broadcast(), "pett-auth"))
            .unwrap();
        broker
            .attach(&StorageTransport::new(dashboard.storage(), "pett-auth:handshake"))
            .unwrap();

        let message = ProtocolMessage::TokenDelivered {
            token: "tok".to_string(),
            sent_at: 1000,
        }
        .to_wire();
        BroadcastTransport::new(popup.broadcast(), "pett-auth")
            .send(&message)
            .unwrap();
        StorageTransport::new(popup.storage(), "pett-auth:handshake")
            .send(&message)
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind(), MessageKind::TokenDelivered);
        assert!(rx.try_recv().is_err());
    }
}
