//! Window transport layer for the login handshake.
//!
//! This crate provides:
//! - Host seams for the browser capabilities the handshake uses
//!   (`WindowContext`, `WindowRef`, `BroadcastBus`, `SharedStorage`)
//! - `MemoryBrowser`, an in-process implementation of those seams
//! - Three redundant transport channels (direct, broadcast, storage)
//! - `MessageBroker`, which validates, deduplicates and normalizes inbound messages

mod broadcast;
mod broker;
mod channel;
mod direct;
mod error;
mod host;
mod memory;
mod storage;

pub use broadcast::{BroadcastTransport, DEFAULT_BROADCAST_CHANNEL};
pub use broker::{MessageBroker, SeenMessageLog, DEFAULT_SEEN_ID_CAPACITY};
pub use channel::{send_all, ChannelKind, EnvelopeCallback, RawEnvelope, TransportChannel};
pub use direct::DirectTransport;
pub use error::{HostError, HostResult, TransportError, TransportResult};
pub use host::{
    BroadcastBus, BroadcastCallback, HostMessage, HostMessageCallback, SharedStorage,
    StorageCallback, StorageEvent, WindowContext, WindowRef,
};
pub use memory::{MemoryBrowser, MemoryBroadcast, MemoryStorage, MemoryWindow, DEFAULT_STORAGE_QUOTA};
pub use storage::{StorageTransport, DEFAULT_STORAGE_KEY};
