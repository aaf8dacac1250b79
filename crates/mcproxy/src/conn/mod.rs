//! The connection hub
//!
//! A [`Conn`] owns the upstream connection and fans every server packet out
//! to the attached clients. Each attached client gets two ordered pipelines
//! (server to client and client to server) running its middleware chain on
//! their own tasks, so a slow client never holds up the others. At most one
//! attached client is linked; only its packets reach the server and while it
//! is linked the proxy's own writes are arbitrated.

mod client;
mod events;
mod options;
mod pipeline;
mod upstream;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use bytes::Bytes;
use mcproxy_config::LogType;
use mcproxy_protocol::{Bound, Fields, PacketCodec, PacketMeta, UpstreamSocket};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub use client::DownstreamClient;
pub use events::{ConnEvent, UpstreamEvent};
pub use options::{ClientMiddleware, ConnOptions};
pub use upstream::{Delivery, Upstream};

use crate::catchup::{self, CATCH_UP_TELEPORT_ID};
use crate::error::{CatchUpError, ProxyError};
use crate::game::GameState;
use crate::middleware::RawPacket;
use crate::session::SessionState;
use pipeline::{Attachment, Job};

const EVENT_CAPACITY: usize = 64;

/// Handle to the hub. Clones share the same state.
#[derive(Clone)]
pub struct Conn {
    inner: Arc<ConnInner>,
}

pub(crate) struct ConnInner {
    options: ConnOptions,
    codec: Arc<dyn PacketCodec>,
    upstream: Upstream,
    game: Arc<dyn GameState>,
    session: Mutex<SessionState>,
    /// Serializes attach/detach/link/unlink
    lifecycle: Mutex<()>,
    attachments: RwLock<Vec<Arc<Attachment>>>,
    linked: RwLock<Option<DownstreamClient>>,
    events: broadcast::Sender<ConnEvent>,
    shutdown: CancellationToken,
}

impl Conn {
    pub fn new(
        options: ConnOptions,
        codec: Arc<dyn PacketCodec>,
        upstream: Arc<dyn UpstreamSocket>,
        game: Arc<dyn GameState>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let upstream = Upstream::new(upstream, options.keep_alive_whitelist.clone());
        Self {
            inner: Arc::new(ConnInner {
                options,
                codec,
                upstream,
                game,
                session: Mutex::new(SessionState::new()),
                lifecycle: Mutex::new(()),
                attachments: RwLock::new(Vec::new()),
                linked: RwLock::new(None),
                events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn options(&self) -> &ConnOptions {
        &self.inner.options
    }

    /// Write entry points for the proxy's own game client
    pub fn upstream(&self) -> &Upstream {
        &self.inner.upstream
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnEvent> {
        self.inner.events.subscribe()
    }

    /// Copy of the replayable session facts observed so far
    pub fn session(&self) -> SessionState {
        self.inner.session.lock().clone()
    }

    pub fn is_attached(&self, client: &DownstreamClient) -> bool {
        self.inner.is_attached(client.id())
    }

    pub fn attached_clients(&self) -> Vec<DownstreamClient> {
        self.inner
            .attachments
            .read()
            .iter()
            .map(|a| a.client.clone())
            .collect()
    }

    pub fn linked(&self) -> Option<DownstreamClient> {
        self.inner.linked.read().clone()
    }

    /// Starts delivering server packets to `client`. A no-op when the
    /// client is already attached or the hub has been disconnected. Must be
    /// called within a tokio runtime.
    #[instrument(skip_all, fields(client = %client.peer()))]
    pub fn attach(&self, client: &DownstreamClient, middleware: ClientMiddleware) {
        let _guard = self.inner.lifecycle.lock();
        self.inner.attach(client, middleware);
    }

    #[instrument(skip_all, fields(client = %client.peer()))]
    pub fn detach(&self, client: &DownstreamClient) {
        let _guard = self.inner.lifecycle.lock();
        self.inner.detach(client.id());
    }

    /// Makes `client` the only one whose packets reach the server,
    /// attaching it first if needed. `middleware` only applies when the
    /// client was not attached yet.
    #[instrument(skip_all, fields(client = %client.peer()))]
    pub fn link(&self, client: &DownstreamClient, middleware: ClientMiddleware) {
        let _guard = self.inner.lifecycle.lock();
        let current = self.inner.linked.read().as_ref().map(DownstreamClient::id);
        if current == Some(client.id()) || self.inner.shutdown.is_cancelled() {
            return;
        }
        if current.is_some() {
            self.inner.unlink();
        }
        self.inner.attach(client, middleware);

        *self.inner.linked.write() = Some(client.clone());
        self.inner.game.set_physics_enabled(false);
        self.inner.upstream.set_arbitrated(true);
        info!(
            log_type = LogType::Hub.as_str(),
            client = %client.peer(),
            "Client linked"
        );
        self.inner.emit(ConnEvent::Linked(client.id()));
    }

    pub fn unlink(&self) {
        let _guard = self.inner.lifecycle.lock();
        self.inner.unlink();
    }

    /// Sends the catch-up sequence to `client`, in order with any server
    /// packets already queued for it.
    pub fn send_packets(&self, client: &DownstreamClient) -> Result<(), ProxyError> {
        client.arm_teleport(i64::from(CATCH_UP_TELEPORT_ID));

        let snapshot = self
            .inner
            .game
            .snapshot()
            .ok_or(CatchUpError::NotSpawned)?;
        let packets = {
            let session = self.inner.session.lock();
            catchup::generate_packets(
                &snapshot,
                &session,
                client.protocol_version(),
                self.inner.options.transformer.as_deref(),
                self.inner.options.chunk_split_threshold,
            )?
        };
        debug!(
            log_type = LogType::CatchUp.as_str(),
            client = %client.peer(),
            "Sending {} catch-up packets", packets.len()
        );

        match self.inner.attachment(client.id()) {
            Some(attachment) => attachment
                .to_client
                .send(Job::Direct(packets))
                .map_err(|_| ProxyError::NotAttached(client.id())),
            None => {
                for packet in &packets {
                    client.socket().write_packet(&packet.name, &packet.fields)?;
                }
                Ok(())
            }
        }
    }

    /// Ends the upstream connection and detaches every client.
    pub fn disconnect(&self) {
        info!(log_type = LogType::Hub.as_str(), "Disconnecting");
        self.inner.upstream.end("conn: disconnect called");
        self.inner.detach_all();
        self.inner.shutdown.cancel();
    }

    /// Entry point for every packet the server sends. Session facts are
    /// recorded here, in arrival order, before the packet is queued for
    /// the attached clients.
    pub fn on_server_raw(&self, meta: PacketMeta, bytes: Bytes) {
        if !meta.is_play() {
            return;
        }
        let raw = Arc::new(RawPacket::new(Bound::Client, meta, bytes));
        self.inner.observe_upstream(&raw);

        for attachment in self.inner.attachments.read().iter() {
            // Fails only once the pipeline is gone, i.e. during detach
            let _ = attachment.to_client.send(Job::Packet(raw.clone()));
        }
    }

    /// Entry point for every packet an attached client sends.
    pub fn handle_client_packet(&self, client: &DownstreamClient, meta: PacketMeta, bytes: Bytes) {
        let Some(attachment) = self.inner.attachment(client.id()) else {
            return;
        };
        let raw = Arc::new(RawPacket::new(Bound::Server, meta, bytes));
        let _ = attachment.to_server.send(Job::Packet(raw));
    }

    /// The client's socket closed.
    pub fn handle_client_end(&self, client: &DownstreamClient) {
        info!(
            log_type = LogType::Downstream.as_str(),
            client = %client.peer(),
            "Client connection closed"
        );
        self.detach(client);
    }

    /// The upstream connection closed.
    pub fn handle_upstream_end(&self, reason: &str) {
        warn!(
            log_type = LogType::Upstream.as_str(),
            "Upstream connection closed: {}", reason
        );
        self.inner.detach_all();
        self.inner.shutdown.cancel();
        self.inner.emit(ConnEvent::UpstreamClosed {
            reason: reason.to_string(),
        });
    }

    /// Drives the hub from the upstream framing layer until the upstream
    /// closes or [`disconnect`](Self::disconnect) is called.
    pub async fn run(&self, mut events: mpsc::Receiver<UpstreamEvent>) {
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(UpstreamEvent::Packet { meta, bytes }) => self.on_server_raw(meta, bytes),
                    Some(UpstreamEvent::Closed { reason }) => {
                        self.handle_upstream_end(&reason);
                        break;
                    }
                    None => {
                        self.handle_upstream_end("upstream event channel closed");
                        break;
                    }
                },
            }
        }
        debug!(log_type = LogType::Hub.as_str(), "Hub loop stopped");
    }

    /// Waits until everything queued for `client` so far, in both
    /// directions, has been handled.
    pub async fn flush(&self, client: &DownstreamClient) -> Result<(), ProxyError> {
        let not_attached = || ProxyError::NotAttached(client.id());
        let attachment = self.inner.attachment(client.id()).ok_or_else(not_attached)?;

        let (client_done, client_wait) = oneshot::channel();
        let (server_done, server_wait) = oneshot::channel();
        attachment
            .to_client
            .send(Job::Barrier(client_done))
            .map_err(|_| not_attached())?;
        attachment
            .to_server
            .send(Job::Barrier(server_done))
            .map_err(|_| not_attached())?;
        drop(attachment);

        client_wait.await.map_err(|_| not_attached())?;
        server_wait.await.map_err(|_| not_attached())?;
        Ok(())
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("attached", &self.inner.attachments.read().len())
            .field("linked", &self.linked().map(|c| c.id()))
            .field("upstream", &self.inner.upstream)
            .finish()
    }
}

impl Drop for ConnInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl ConnInner {
    fn emit(&self, event: ConnEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn attachment(&self, id: Uuid) -> Option<Arc<Attachment>> {
        self.attachments
            .read()
            .iter()
            .find(|a| a.client.id() == id)
            .cloned()
    }

    pub(crate) fn is_attached(&self, id: Uuid) -> bool {
        self.attachments.read().iter().any(|a| a.client.id() == id)
    }

    pub(crate) fn is_linked(&self, id: Uuid) -> bool {
        self.linked.read().as_ref().map(DownstreamClient::id) == Some(id)
    }

    fn attach(self: &Arc<Self>, client: &DownstreamClient, middleware: ClientMiddleware) {
        if self.shutdown.is_cancelled() || self.is_attached(client.id()) {
            return;
        }
        client.reset_position_packets();
        let attachment = pipeline::spawn(self, client, middleware);
        self.attachments.write().push(attachment);

        info!(
            log_type = LogType::Hub.as_str(),
            client = %client.peer(),
            version = %client.protocol_version(),
            "Client attached"
        );
        self.emit(ConnEvent::Attached(client.id()));
    }

    fn detach(&self, id: Uuid) {
        if self.is_linked(id) {
            self.unlink();
        }
        let removed = {
            let mut attachments = self.attachments.write();
            attachments
                .iter()
                .position(|a| a.client.id() == id)
                .map(|index| attachments.remove(index))
        };
        let Some(attachment) = removed else {
            return;
        };
        attachment.close();

        info!(
            log_type = LogType::Hub.as_str(),
            client = %attachment.client.peer(),
            "Client detached"
        );
        self.emit(ConnEvent::Detached(id));
    }

    fn detach_all(&self) {
        let _guard = self.lifecycle.lock();
        let ids: Vec<Uuid> = self
            .attachments
            .read()
            .iter()
            .map(|a| a.client.id())
            .collect();
        for id in ids {
            self.detach(id);
        }
    }

    fn unlink(&self) {
        let Some(client) = self.linked.write().take() else {
            return;
        };
        self.upstream.set_arbitrated(false);
        let flying = self.session.lock().is_flying();
        self.game.set_physics_enabled(!flying);

        info!(
            log_type = LogType::Hub.as_str(),
            client = %client.peer(),
            "Client unlinked"
        );
        self.emit(ConnEvent::Unlinked(client.id()));
    }

    fn observe_upstream(&self, raw: &RawPacket) {
        let name = raw.name();
        let is_abilities = name == "abilities";
        if !is_abilities && !SessionState::tracks_upstream(name) {
            return;
        }
        let fields = match raw.parse(self.codec.as_ref()) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(
                    log_type = LogType::Session.as_str(),
                    "Cannot parse upstream {} packet: {}", name, e
                );
                return;
            }
        };

        if is_abilities {
            let flying = {
                let mut session = self.session.lock();
                session.observe_abilities(fields.get_i64("flags").unwrap_or(0));
                session.is_flying()
            };
            let linked = self.linked.read().is_some();
            self.game.set_physics_enabled(!linked && !flying);
        } else {
            self.session.lock().observe_upstream(name, fields);
        }
    }

    /// Answers a client that lost its initial teleport with a fresh one
    pub(crate) fn resync_position(&self, client: &DownstreamClient) {
        let Some(player) = self.game.player() else {
            debug!(
                log_type = LogType::Session.as_str(),
                "Cannot resync position before spawn"
            );
            return;
        };
        let position = match &self.options.transformer {
            Some(transformer) => transformer.position_to_client(player.position),
            None => player.position,
        };
        let fields = Fields::new()
            .with("x", position.x)
            .with("y", position.y)
            .with("z", position.z)
            .with("yaw", catchup::yaw_to_degrees(player.yaw))
            .with("pitch", catchup::pitch_to_degrees(player.pitch))
            .with("flags", 0i32)
            .with("teleportId", CATCH_UP_TELEPORT_ID);
        client.arm_teleport(i64::from(CATCH_UP_TELEPORT_ID));
        if let Err(e) = client.socket().write_packet("position", &fields) {
            debug!(
                log_type = LogType::Downstream.as_str(),
                client = %client.peer(),
                "Position resync failed: {}", e
            );
        }
    }
}
