//! Protocol vocabulary for mcproxy
//!
//! This crate does not frame, compress, or encrypt anything. It defines the
//! contract the proxy core expects from the codec layer (named packets with
//! structured fields) and the sockets built on top of it.

pub mod codec;
pub mod mock;
pub mod network;
pub mod state;
pub mod types;
pub mod value;
pub mod version;

pub use codec::{PacketCodec, PacketError};
pub use network::{ClientSocket, PacketSink, SocketError, UpstreamSocket};
pub use state::{Bound, PacketMeta, ProtocolState};
pub use types::{ProtocolRead, ProtocolWrite, VarInt};
pub use value::{FieldValue, Fields, Packet};
pub use version::Version;
