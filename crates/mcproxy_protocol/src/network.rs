//! Socket abstractions the proxy writes through

use std::io;

use bytes::Bytes;
use thiserror::Error;

use crate::codec::PacketError;
use crate::state::ProtocolState;
use crate::value::Fields;
use crate::version::Version;

/// Error type for socket writes
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("Packet Error: {0}")]
    Packet(#[from] PacketError),

    #[error("Socket closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SocketError>;

/// Anything packets can be written to.
///
/// Writes are expected to enqueue onto the framing layer and return without
/// waiting for the peer; ordering between calls on one sink must be
/// preserved.
pub trait PacketSink: Send + Sync {
    /// Serializes `fields` with the codec and writes the result.
    fn write_packet(&self, name: &str, fields: &Fields) -> Result<()>;

    /// Writes an already serialized packet body.
    fn write_raw(&self, data: Bytes) -> Result<()>;

    fn protocol_state(&self) -> ProtocolState;

    fn protocol_version(&self) -> Version;

    /// Closes the connection with a human readable reason.
    fn end(&self, reason: &str);
}

/// A downstream game client connected to the proxy
pub trait ClientSocket: PacketSink {
    /// Short label used in logs
    fn peer(&self) -> String;
}

/// The proxy's own connection to the real server
pub trait UpstreamSocket: PacketSink {
    /// Writes a plugin channel message.
    fn write_channel(&self, channel: &str, data: Bytes) -> Result<()>;
}
