use bytes::Bytes;
use mcproxy_protocol::PacketMeta;
use uuid::Uuid;

/// Lifecycle notifications broadcast by a [`Conn`](super::Conn)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnEvent {
    Attached(Uuid),
    Detached(Uuid),
    Linked(Uuid),
    Unlinked(Uuid),
    /// The linked client switched its held hotbar slot
    HeldItemSlotChanged { client: Uuid, slot: u8 },
    UpstreamClosed { reason: String },
}

/// What the upstream framing layer feeds into [`Conn::run`](super::Conn::run)
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    Packet { meta: PacketMeta, bytes: Bytes },
    Closed { reason: String },
}
