use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use mcproxy_config::SyncMarkerConfig;
use mcproxy_protocol::{ClientSocket, Fields, ProtocolState, SocketError, Version};
use parking_lot::Mutex;
use uuid::Uuid;

const BUNDLE_DELIMITER: &str = "bundle_delimiter";

/// A game client connected to the proxy. Cheap to clone; clones refer to
/// the same connection.
#[derive(Clone)]
pub struct DownstreamClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    id: Uuid,
    socket: Arc<dyn ClientSocket>,
    /// Counted writes since the last sync marker
    since_marker: AtomicU32,
    position_packets: AtomicU32,
    /// Id of the synthetic teleport the client has yet to confirm
    pending_teleport: Mutex<Option<i64>>,
}

impl DownstreamClient {
    pub fn new(socket: Arc<dyn ClientSocket>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                id: Uuid::new_v4(),
                socket,
                since_marker: AtomicU32::new(0),
                position_packets: AtomicU32::new(0),
                pending_teleport: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn socket(&self) -> &Arc<dyn ClientSocket> {
        &self.inner.socket
    }

    pub fn peer(&self) -> String {
        self.inner.socket.peer()
    }

    pub fn protocol_version(&self) -> Version {
        self.inner.socket.protocol_version()
    }

    pub fn is_legacy(&self) -> bool {
        self.protocol_version().is_legacy()
    }

    pub fn is_play(&self) -> bool {
        self.inner.socket.protocol_state() == ProtocolState::Play
    }

    pub fn position_packets_sent(&self) -> u32 {
        self.inner.position_packets.load(Ordering::Acquire)
    }

    pub(crate) fn note_position_packet(&self) {
        self.inner.position_packets.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn reset_position_packets(&self) {
        self.inner.position_packets.store(0, Ordering::Release);
    }

    pub fn pending_teleport(&self) -> Option<i64> {
        *self.inner.pending_teleport.lock()
    }

    pub(crate) fn arm_teleport(&self, id: i64) {
        *self.inner.pending_teleport.lock() = Some(id);
    }

    /// Clears the pending teleport if `id` matches it
    pub(crate) fn confirm_teleport(&self, id: i64) -> bool {
        let mut pending = self.inner.pending_teleport.lock();
        if *pending == Some(id) {
            *pending = None;
            true
        } else {
            false
        }
    }

    fn sends_markers(&self, marker: &SyncMarkerConfig) -> bool {
        marker.enabled && self.protocol_version().has_bundle_delimiter()
    }

    /// Writes a forwarded packet and emits a sync marker every
    /// `every_packets` of them.
    pub(crate) fn write_counted(
        &self,
        name: &str,
        fields: &Fields,
        marker: &SyncMarkerConfig,
    ) -> Result<(), SocketError> {
        self.inner.socket.write_packet(name, fields)?;
        self.count_write(marker)
    }

    pub(crate) fn write_raw_counted(
        &self,
        data: bytes::Bytes,
        marker: &SyncMarkerConfig,
    ) -> Result<(), SocketError> {
        self.inner.socket.write_raw(data)?;
        self.count_write(marker)
    }

    fn count_write(&self, marker: &SyncMarkerConfig) -> Result<(), SocketError> {
        if !self.sends_markers(marker) {
            return Ok(());
        }
        let written = self.inner.since_marker.fetch_add(1, Ordering::AcqRel) + 1;
        if written >= marker.every_packets {
            self.write_marker()?;
        }
        Ok(())
    }

    /// Periodic marker, only once the client is in play
    pub(crate) fn tick_marker(&self, marker: &SyncMarkerConfig) -> Result<(), SocketError> {
        if self.sends_markers(marker) && self.is_play() {
            self.write_marker()?;
        }
        Ok(())
    }

    fn write_marker(&self) -> Result<(), SocketError> {
        self.inner.since_marker.store(0, Ordering::Release);
        self.inner.socket.write_packet(BUNDLE_DELIMITER, &Fields::new())
    }
}

impl PartialEq for DownstreamClient {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for DownstreamClient {}

impl fmt::Debug for DownstreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownstreamClient")
            .field("id", &self.inner.id)
            .field("peer", &self.peer())
            .finish()
    }
}
