//! Mock implementations of the codec and socket interfaces for testing

use bytes::Bytes;
use parking_lot::Mutex;

use crate::codec::{PacketCodec, PacketError, Result};
use crate::network::{self, ClientSocket, PacketSink, SocketError, UpstreamSocket};
use crate::state::{Bound, ProtocolState};
use crate::value::Fields;
use crate::version::Version;

/// Codec that stores fields as JSON. Deterministic, so serializing the
/// result of a parse reproduces the original bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode(fields: &Fields) -> Bytes {
        Bytes::from(serde_json::to_vec(fields).unwrap_or_default())
    }
}

impl PacketCodec for JsonCodec {
    fn parse(&self, _bound: Bound, _name: &str, buffer: &[u8]) -> Result<Fields> {
        serde_json::from_slice(buffer).map_err(|e| PacketError::invalid(e.to_string()))
    }

    fn serialize(&self, _bound: Bound, _name: &str, fields: &Fields) -> Result<Bytes> {
        serde_json::to_vec(fields)
            .map(Bytes::from)
            .map_err(|e| PacketError::Other(e.to_string()))
    }
}

/// One write observed by a [`RecordingSocket`]
#[derive(Debug, Clone, PartialEq)]
pub enum Written {
    Packet(String, Fields),
    Raw(Bytes),
    Channel(String, Bytes),
}

impl Written {
    /// Packet name, or `"<raw>"` / `"<channel>"` for the other kinds
    pub fn name(&self) -> &str {
        match self {
            Written::Packet(name, _) => name,
            Written::Raw(_) => "<raw>",
            Written::Channel(..) => "<channel>",
        }
    }

    pub fn fields(&self) -> Option<&Fields> {
        match self {
            Written::Packet(_, fields) => Some(fields),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct RecordingState {
    written: Vec<Written>,
    state: ProtocolState,
    version: Version,
    ended: Option<String>,
}

/// Socket that records everything written to it
#[derive(Debug)]
pub struct RecordingSocket {
    label: String,
    inner: Mutex<RecordingState>,
}

impl RecordingSocket {
    pub fn new(label: impl Into<String>, version: Version) -> Self {
        Self {
            label: label.into(),
            inner: Mutex::new(RecordingState {
                written: Vec::new(),
                state: ProtocolState::Play,
                version,
                ended: None,
            }),
        }
    }

    pub fn set_state(&self, state: ProtocolState) {
        self.inner.lock().state = state;
    }

    pub fn written(&self) -> Vec<Written> {
        self.inner.lock().written.clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner
            .lock()
            .written
            .iter()
            .map(|w| w.name().to_string())
            .collect()
    }

    /// Written items other than `bundle_delimiter`
    pub fn without_delimiters(&self) -> Vec<Written> {
        self.inner
            .lock()
            .written
            .iter()
            .filter(|w| w.name() != "bundle_delimiter")
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().written.clear();
    }

    pub fn ended(&self) -> Option<String> {
        self.inner.lock().ended.clone()
    }

    fn push(&self, item: Written) -> network::Result<()> {
        let mut inner = self.inner.lock();
        if inner.ended.is_some() {
            return Err(SocketError::Closed);
        }
        inner.written.push(item);
        Ok(())
    }
}

impl PacketSink for RecordingSocket {
    fn write_packet(&self, name: &str, fields: &Fields) -> network::Result<()> {
        self.push(Written::Packet(name.to_string(), fields.clone()))
    }

    fn write_raw(&self, data: Bytes) -> network::Result<()> {
        self.push(Written::Raw(data))
    }

    fn protocol_state(&self) -> ProtocolState {
        self.inner.lock().state
    }

    fn protocol_version(&self) -> Version {
        self.inner.lock().version
    }

    fn end(&self, reason: &str) {
        self.inner.lock().ended.get_or_insert_with(|| reason.to_string());
    }
}

impl ClientSocket for RecordingSocket {
    fn peer(&self) -> String {
        self.label.clone()
    }
}

impl UpstreamSocket for RecordingSocket {
    fn write_channel(&self, channel: &str, data: Bytes) -> network::Result<()> {
        self.push(Written::Channel(channel.to_string(), data))
    }
}
