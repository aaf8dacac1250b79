//! Per-client pipelines and the built-in middleware steps

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use mcproxy_config::{LogType, SyncMarkerConfig};
use mcproxy_protocol::{Bound, Packet};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ClientMiddleware, ConnEvent, ConnInner, DownstreamClient};
use crate::middleware::{
    self, MiddlewareAction, Outcome, PacketContext, PacketMiddleware, RawPacket,
};
use crate::session::{ClientEffect, SessionState};
use crate::transform::{ChunkLayout, PositionTransformer, Rewrite};

pub(crate) enum Job {
    Packet(Arc<RawPacket>),
    /// Already final packets, written as is and not counted towards the
    /// sync marker
    Direct(Vec<Packet>),
    Barrier(oneshot::Sender<()>),
}

/// An attached client and the queues feeding its pipelines
pub(crate) struct Attachment {
    pub(crate) client: DownstreamClient,
    pub(crate) to_client: mpsc::UnboundedSender<Job>,
    pub(crate) to_server: mpsc::UnboundedSender<Job>,
    token: CancellationToken,
    attached: AtomicBool,
}

impl Attachment {
    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Stops the pipelines. Work already in flight finishes but its result
    /// is discarded.
    pub(crate) fn close(&self) {
        self.attached.store(false, Ordering::Release);
        self.token.cancel();
    }
}

/// Creates the attachment for `client` and starts its tasks.
pub(super) fn spawn(
    conn: &Arc<ConnInner>,
    client: &DownstreamClient,
    middleware: ClientMiddleware,
) -> Arc<Attachment> {
    let (to_client, to_client_rx) = mpsc::unbounded_channel();
    let (to_server, to_server_rx) = mpsc::unbounded_channel();
    let attachment = Arc::new(Attachment {
        client: client.clone(),
        to_client,
        to_server,
        token: conn.shutdown.child_token(),
        attached: AtomicBool::new(true),
    });

    let weak = Arc::downgrade(conn);
    let options = &conn.options;
    let mut to_client_chain: Vec<Arc<dyn PacketMiddleware>> =
        vec![Arc::new(AccessControl { conn: weak.clone() })];
    let mut to_server_chain: Vec<Arc<dyn PacketMiddleware>> =
        vec![Arc::new(ServerAccess { conn: weak.clone() })];
    if let Some(transformer) = &options.transformer {
        let rewrite: Arc<dyn PacketMiddleware> = Arc::new(CoordinateRewrite {
            conn: weak.clone(),
            transformer: transformer.clone(),
        });
        to_client_chain.push(rewrite.clone());
        to_server_chain.push(rewrite);
    }
    to_client_chain.extend(options.to_client_middleware.iter().cloned());
    to_client_chain.extend(middleware.to_client);
    to_server_chain.extend(options.to_server_middleware.iter().cloned());
    to_server_chain.extend(middleware.to_server);

    tokio::spawn(run_to_client(
        weak.clone(),
        attachment.clone(),
        to_client_chain,
        to_client_rx,
    ));
    tokio::spawn(run_to_server(
        weak,
        attachment.clone(),
        to_server_chain,
        to_server_rx,
    ));
    if options.sync_marker.enabled && client.protocol_version().has_bundle_delimiter() {
        tokio::spawn(run_sync_marker(
            attachment.clone(),
            options.sync_marker.clone(),
        ));
    }
    attachment
}

/// Next job, or `None` once the attachment is closed or the hub is gone
async fn next_job(
    attachment: &Attachment,
    rx: &mut mpsc::UnboundedReceiver<Job>,
) -> Option<Job> {
    tokio::select! {
        _ = attachment.token.cancelled() => None,
        job = rx.recv() => job,
    }
}

async fn run_to_client(
    conn: Weak<ConnInner>,
    attachment: Arc<Attachment>,
    chain: Vec<Arc<dyn PacketMiddleware>>,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = next_job(&attachment, &mut rx).await {
        let Some(conn) = conn.upgrade() else {
            break;
        };
        match job {
            Job::Packet(raw) => conn.deliver_to_client(&attachment, &chain, raw).await,
            Job::Direct(packets) => {
                if !attachment.is_attached() {
                    continue;
                }
                let socket = attachment.client.socket();
                for packet in &packets {
                    if let Err(e) = socket.write_packet(&packet.name, &packet.fields) {
                        debug!(
                            log_type = LogType::Downstream.as_str(),
                            client = %attachment.client.peer(),
                            "Catch-up write failed: {}", e
                        );
                        break;
                    }
                }
            }
            Job::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(
        log_type = LogType::Downstream.as_str(),
        client = %attachment.client.peer(),
        "To-client pipeline stopped"
    );
}

async fn run_to_server(
    conn: Weak<ConnInner>,
    attachment: Arc<Attachment>,
    chain: Vec<Arc<dyn PacketMiddleware>>,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = next_job(&attachment, &mut rx).await {
        let Some(conn) = conn.upgrade() else {
            break;
        };
        match job {
            Job::Packet(raw) => conn.deliver_to_server(&attachment, &chain, raw).await,
            Job::Direct(_) => {}
            Job::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(
        log_type = LogType::Upstream.as_str(),
        client = %attachment.client.peer(),
        "To-server pipeline stopped"
    );
}

async fn run_sync_marker(attachment: Arc<Attachment>, config: SyncMarkerConfig) {
    let mut ticker = tokio::time::interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = attachment.token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = attachment.client.tick_marker(&config) {
            debug!(
                log_type = LogType::Downstream.as_str(),
                client = %attachment.client.peer(),
                "Sync marker write failed: {}", e
            );
        }
    }
}

impl ConnInner {
    async fn deliver_to_client(
        &self,
        attachment: &Attachment,
        chain: &[Arc<dyn PacketMiddleware>],
        raw: Arc<RawPacket>,
    ) {
        let client = &attachment.client;
        if !client.is_play() || !raw.meta().is_play() {
            return;
        }
        let mut ctx = PacketContext::new(client.clone(), raw, self.codec.clone());
        middleware::run_chain(chain, &mut ctx).await;
        if !attachment.is_attached() {
            return;
        }

        let marker = &self.options.sync_marker;
        let result = match ctx.into_outcome(self.options.optimize_packet_write) {
            Outcome::Canceled => Ok(()),
            Outcome::Raw(bytes) => client.write_raw_counted(bytes, marker),
            Outcome::Packet(packet) => client.write_counted(&packet.name, &packet.fields, marker),
            Outcome::Packets(packets) => packets
                .iter()
                .try_for_each(|p| client.write_counted(&p.name, &p.fields, marker)),
        };
        if let Err(e) = result {
            debug!(
                log_type = LogType::Downstream.as_str(),
                client = %client.peer(),
                "Write to client failed: {}", e
            );
        }
    }

    async fn deliver_to_server(
        &self,
        attachment: &Attachment,
        chain: &[Arc<dyn PacketMiddleware>],
        raw: Arc<RawPacket>,
    ) {
        let client = &attachment.client;
        if !attachment.is_attached() {
            return;
        }
        if raw.name() == "teleport_confirm" {
            let id = raw
                .parse(self.codec.as_ref())
                .ok()
                .and_then(|f| f.get_i64("teleportId"));
            if let Some(id) = id {
                if client.confirm_teleport(id) {
                    debug!(
                        log_type = LogType::Session.as_str(),
                        client = %client.peer(),
                        "Swallowed confirm of synthetic teleport {}", id
                    );
                    return;
                }
            }
        }

        let mut ctx = PacketContext::new(client.clone(), raw, self.codec.clone());
        middleware::run_chain(chain, &mut ctx).await;
        if !attachment.is_attached() || !self.is_linked(client.id()) {
            return;
        }

        let result = match ctx.into_outcome(self.options.optimize_packet_write) {
            Outcome::Canceled => Ok(()),
            Outcome::Raw(bytes) => self.upstream.forward_raw(bytes),
            Outcome::Packet(packet) => self.upstream.forward_packet(&packet.name, &packet.fields),
            Outcome::Packets(packets) => packets
                .iter()
                .try_for_each(|p| self.upstream.forward_packet(&p.name, &p.fields)),
        };
        if let Err(e) = result {
            debug!(
                log_type = LogType::Upstream.as_str(),
                client = %client.peer(),
                "Write to upstream failed: {}", e
            );
        }
    }
}

/// Server packets only reach clients that are still attached
struct AccessControl {
    conn: Weak<ConnInner>,
}

#[async_trait]
impl PacketMiddleware for AccessControl {
    async fn on_packet(&self, ctx: &mut PacketContext) -> anyhow::Result<MiddlewareAction> {
        let attached = self
            .conn
            .upgrade()
            .is_some_and(|conn| conn.is_attached(ctx.client().id()));
        Ok(if attached {
            MiddlewareAction::Pass
        } else {
            MiddlewareAction::Cancel
        })
    }

    fn name(&self) -> &str {
        "access_control"
    }
}

/// Client packets: resyncs lost teleports, keeps the bot in step with the
/// linked client and holds back everything an unlinked client sends.
struct ServerAccess {
    conn: Weak<ConnInner>,
}

#[async_trait]
impl PacketMiddleware for ServerAccess {
    async fn on_packet(&self, ctx: &mut PacketContext) -> anyhow::Result<MiddlewareAction> {
        let Some(conn) = self.conn.upgrade() else {
            return Ok(MiddlewareAction::Cancel);
        };
        if !ctx.meta().is_play() {
            return Ok(MiddlewareAction::Cancel);
        }

        let name = ctx.name().to_string();
        if name == "teleport_confirm"
            && ctx.peek().ok().and_then(|f| f.get_i64("teleportId")) == Some(0)
        {
            conn.resync_position(ctx.client());
            return Ok(MiddlewareAction::Cancel);
        }

        if !conn.is_linked(ctx.client().id()) {
            return Ok(MiddlewareAction::Cancel);
        }

        if SessionState::tracks_client(&name) {
            if let Ok(fields) = ctx.peek() {
                let fields = match &conn.options.transformer {
                    Some(t) => match t.on_client_to_server(&name, fields) {
                        Rewrite::Replace(translated) => Cow::Owned(translated),
                        _ => Cow::Borrowed(fields),
                    },
                    None => Cow::Borrowed(fields),
                };
                let effect = conn.session.lock().apply_client_packet(
                    &name,
                    &fields,
                    ctx.client(),
                    conn.game.as_ref(),
                );
                if let Some(ClientEffect::HeldItemSlot(slot)) = effect {
                    conn.emit(ConnEvent::HeldItemSlotChanged {
                        client: ctx.client().id(),
                        slot,
                    });
                }
            }
        }

        // The proxy's game client answers the server's keep-alives itself
        if name == "keep_alive" {
            return Ok(MiddlewareAction::Cancel);
        }
        Ok(MiddlewareAction::Pass)
    }

    fn name(&self) -> &str {
        "server_access"
    }
}

/// Moves world coordinates between server and client space
struct CoordinateRewrite {
    conn: Weak<ConnInner>,
    transformer: Arc<dyn PositionTransformer>,
}

#[async_trait]
impl PacketMiddleware for CoordinateRewrite {
    async fn on_packet(&self, ctx: &mut PacketContext) -> anyhow::Result<MiddlewareAction> {
        if ctx.is_canceled() {
            return Ok(MiddlewareAction::Pass);
        }
        let Some(conn) = self.conn.upgrade() else {
            return Ok(MiddlewareAction::Pass);
        };
        // Unparseable packets travel unchanged
        let Ok(fields) = ctx.peek() else {
            return Ok(MiddlewareAction::Pass);
        };

        let rewrite = match ctx.bound() {
            Bound::Client => {
                let layout = ChunkLayout {
                    legacy: ctx.client().is_legacy(),
                    sky_light: conn.session.lock().has_sky_light(),
                    split_threshold: conn.options.chunk_split_threshold,
                };
                self.transformer
                    .on_server_to_client(ctx.name(), fields, &layout)
            }
            Bound::Server => self.transformer.on_client_to_server(ctx.name(), fields),
        };

        Ok(match rewrite {
            Rewrite::Unchanged => MiddlewareAction::Pass,
            Rewrite::Drop => MiddlewareAction::Cancel,
            Rewrite::Replace(fields) => MiddlewareAction::Replace(fields),
            Rewrite::Split(packets) => {
                ctx.expand(packets);
                MiddlewareAction::Pass
            }
        })
    }

    fn name(&self) -> &str {
        "coordinate_rewrite"
    }
}
