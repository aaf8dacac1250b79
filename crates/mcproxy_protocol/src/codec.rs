//! The codec contract consumed by the proxy core

use std::io;

use bytes::Bytes;
use thiserror::Error;

use crate::state::Bound;
use crate::value::Fields;

/// Error type for packet (de)serialization and field access
#[derive(Error, Debug)]
pub enum PacketError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid packet format: {0}")]
    InvalidFormat(String),

    #[error("Missing field '{0}'")]
    MissingField(String),

    #[error("{0}")]
    Other(String),
}

impl PacketError {
    pub fn missing(field: impl Into<String>) -> Self {
        PacketError::MissingField(field.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        PacketError::InvalidFormat(msg.into())
    }
}

impl From<PacketError> for io::Error {
    fn from(err: PacketError) -> Self {
        match err {
            PacketError::Io(e) => e,
            PacketError::InvalidFormat(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
            other => io::Error::other(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PacketError>;

/// Turns packet bodies into named fields and back.
///
/// Framing, compression and encryption happen below this layer; `buffer`
/// is always a complete packet as delivered by the framing layer.
pub trait PacketCodec: Send + Sync {
    fn parse(&self, bound: Bound, name: &str, buffer: &[u8]) -> Result<Fields>;

    fn serialize(&self, bound: Bound, name: &str, fields: &Fields) -> Result<Bytes>;
}
