use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use mcproxy_config::LogType;
use mcproxy_protocol::{Fields, ProtocolState, SocketError, UpstreamSocket, Version};
use tracing::debug;

/// Whether a write made it to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Held back because a client is driving the connection
    Vetoed,
}

/// The proxy's connection to the real server.
///
/// [`write`](Self::write), [`write_raw`](Self::write_raw) and
/// [`write_channel`](Self::write_channel) are the entry points for the
/// proxy's own game client. While a client is linked they are arbitrated:
/// only packets named in the keep-alive whitelist get through. Traffic of
/// the linked client itself is never arbitrated.
pub struct Upstream {
    socket: Arc<dyn UpstreamSocket>,
    arbitrated: AtomicBool,
    whitelist: Vec<String>,
}

impl Upstream {
    pub fn new(socket: Arc<dyn UpstreamSocket>, whitelist: Vec<String>) -> Self {
        Self {
            socket,
            arbitrated: AtomicBool::new(false),
            whitelist,
        }
    }

    pub fn write(&self, name: &str, fields: &Fields) -> Result<Delivery, SocketError> {
        if self.is_arbitrated() && !self.whitelist.iter().any(|w| w == name) {
            debug!(
                log_type = LogType::Upstream.as_str(),
                "Vetoed proxy write of {} while a client is linked", name
            );
            return Ok(Delivery::Vetoed);
        }
        self.socket.write_packet(name, fields)?;
        Ok(Delivery::Sent)
    }

    pub fn write_raw(&self, data: Bytes) -> Result<Delivery, SocketError> {
        if self.is_arbitrated() {
            debug!(
                log_type = LogType::Upstream.as_str(),
                "Vetoed raw proxy write while a client is linked"
            );
            return Ok(Delivery::Vetoed);
        }
        self.socket.write_raw(data)?;
        Ok(Delivery::Sent)
    }

    pub fn write_channel(&self, channel: &str, data: Bytes) -> Result<Delivery, SocketError> {
        if self.is_arbitrated() {
            debug!(
                log_type = LogType::Upstream.as_str(),
                "Vetoed proxy write on channel {} while a client is linked", channel
            );
            return Ok(Delivery::Vetoed);
        }
        self.socket.write_channel(channel, data)?;
        Ok(Delivery::Sent)
    }

    pub(crate) fn forward_packet(&self, name: &str, fields: &Fields) -> Result<(), SocketError> {
        self.socket.write_packet(name, fields)
    }

    pub(crate) fn forward_raw(&self, data: Bytes) -> Result<(), SocketError> {
        self.socket.write_raw(data)
    }

    pub fn is_arbitrated(&self) -> bool {
        self.arbitrated.load(Ordering::Acquire)
    }

    pub(crate) fn set_arbitrated(&self, arbitrated: bool) {
        self.arbitrated.store(arbitrated, Ordering::Release);
    }

    pub fn protocol_state(&self) -> ProtocolState {
        self.socket.protocol_state()
    }

    pub fn protocol_version(&self) -> Version {
        self.socket.protocol_version()
    }

    pub fn end(&self, reason: &str) {
        self.socket.end(reason);
    }
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("arbitrated", &self.is_arbitrated())
            .field("whitelist", &self.whitelist)
            .finish()
    }
}
