//! Packet middleware contract and the per-packet context chains run against

use std::any::type_name;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::FutureExt;
use mcproxy_config::LogType;
use mcproxy_protocol::{Bound, Fields, Packet, PacketCodec, PacketError, PacketMeta};
use tracing::{error, warn};

use crate::conn::DownstreamClient;

/// What a middleware decided about the packet it was shown
#[derive(Debug, Clone, PartialEq)]
pub enum MiddlewareAction {
    /// No opinion
    Pass,
    Cancel,
    /// Revert a cancel made earlier in the same chain
    Uncancel,
    /// Forward these fields instead. Does not change the cancel state.
    Replace(Fields),
}

#[async_trait]
pub trait PacketMiddleware: Send + Sync {
    async fn on_packet(&self, ctx: &mut PacketContext) -> anyhow::Result<MiddlewareAction>;

    /// Used in logs
    fn name(&self) -> &str {
        type_name::<Self>()
    }
}

struct FnMiddleware<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> PacketMiddleware for FnMiddleware<F>
where
    F: Fn(&mut PacketContext) -> anyhow::Result<MiddlewareAction> + Send + Sync + 'static,
{
    async fn on_packet(&self, ctx: &mut PacketContext) -> anyhow::Result<MiddlewareAction> {
        (self.f)(ctx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wraps a synchronous closure as a middleware
pub fn from_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn PacketMiddleware>
where
    F: Fn(&mut PacketContext) -> anyhow::Result<MiddlewareAction> + Send + Sync + 'static,
{
    Arc::new(FnMiddleware {
        name: name.into(),
        f,
    })
}

/// A packet as delivered by the framing layer. Shared by every recipient;
/// fields are parsed at most once, on first demand.
#[derive(Debug)]
pub struct RawPacket {
    bound: Bound,
    meta: PacketMeta,
    bytes: Bytes,
    parsed: OnceLock<Result<Fields, String>>,
}

impl RawPacket {
    pub fn new(bound: Bound, meta: PacketMeta, bytes: Bytes) -> Self {
        Self {
            bound,
            meta,
            bytes,
            parsed: OnceLock::new(),
        }
    }

    pub fn bound(&self) -> Bound {
        self.bound
    }

    pub fn meta(&self) -> &PacketMeta {
        &self.meta
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn parse(&self, codec: &dyn PacketCodec) -> Result<&Fields, PacketError> {
        self.parsed
            .get_or_init(|| {
                codec
                    .parse(self.bound, &self.meta.name, &self.bytes)
                    .map_err(|e| e.to_string())
            })
            .as_ref()
            .map_err(|e| PacketError::invalid(format!("{}: {}", self.meta.name, e)))
    }
}

/// How a packet leaves the pipeline once its chain has run
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Canceled,
    Raw(Bytes),
    Packet(Packet),
    Packets(Vec<Packet>),
}

/// One packet on its way to one recipient
pub struct PacketContext {
    client: DownstreamClient,
    raw: Arc<RawPacket>,
    codec: Arc<dyn PacketCodec>,
    current: Option<Fields>,
    accessed: bool,
    canceled: bool,
    expanded: Option<Vec<Packet>>,
}

impl PacketContext {
    pub fn new(client: DownstreamClient, raw: Arc<RawPacket>, codec: Arc<dyn PacketCodec>) -> Self {
        Self {
            client,
            raw,
            codec,
            current: None,
            accessed: false,
            canceled: false,
            expanded: None,
        }
    }

    pub fn name(&self) -> &str {
        self.raw.name()
    }

    pub fn meta(&self) -> &PacketMeta {
        self.raw.meta()
    }

    pub fn bound(&self) -> Bound {
        self.raw.bound()
    }

    /// The downstream client this packet comes from or goes to
    pub fn client(&self) -> &DownstreamClient {
        &self.client
    }

    pub fn raw_bytes(&self) -> &Bytes {
        self.raw.bytes()
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Parsed fields. Touching them means the packet is re-serialized on
    /// the way out instead of forwarding the original bytes.
    pub fn fields(&mut self) -> Result<&Fields, PacketError> {
        self.load()?;
        self.accessed = true;
        self.current.as_ref().ok_or_else(|| PacketError::missing("fields"))
    }

    pub fn fields_mut(&mut self) -> Result<&mut Fields, PacketError> {
        self.load()?;
        self.accessed = true;
        self.current.as_mut().ok_or_else(|| PacketError::missing("fields"))
    }

    /// Swaps in new fields for everything downstream of this point
    pub fn replace(&mut self, fields: Fields) {
        self.current = Some(fields);
        self.accessed = true;
        self.expanded = None;
    }

    /// Reads the fields without giving up raw forwarding
    pub(crate) fn peek(&self) -> Result<&Fields, PacketError> {
        match &self.current {
            Some(fields) => Ok(fields),
            None => self.raw.parse(self.codec.as_ref()),
        }
    }

    /// Replaces this packet by several packets written in order
    pub(crate) fn expand(&mut self, packets: Vec<Packet>) {
        self.accessed = true;
        self.expanded = Some(packets);
    }

    fn load(&mut self) -> Result<(), PacketError> {
        if self.current.is_none() {
            let fields = self.raw.parse(self.codec.as_ref())?.clone();
            self.current = Some(fields);
        }
        Ok(())
    }

    fn apply(&mut self, action: MiddlewareAction) {
        match action {
            MiddlewareAction::Pass => {}
            MiddlewareAction::Cancel => self.canceled = true,
            MiddlewareAction::Uncancel => self.canceled = false,
            MiddlewareAction::Replace(fields) => self.replace(fields),
        }
    }

    /// `custom_payload` always goes out as the original bytes, as does any
    /// packet no middleware looked into when `optimize` is set.
    pub(crate) fn into_outcome(self, optimize: bool) -> Outcome {
        if self.canceled {
            return Outcome::Canceled;
        }
        if let Some(packets) = self.expanded {
            return Outcome::Packets(packets);
        }
        let name = self.raw.name().to_string();
        if name == "custom_payload" || (optimize && !self.accessed) {
            return Outcome::Raw(self.raw.bytes().clone());
        }
        match self.current {
            Some(fields) => Outcome::Packet(Packet::new(name, fields)),
            None => match self.raw.parse(self.codec.as_ref()) {
                Ok(fields) => Outcome::Packet(Packet::new(name, fields.clone())),
                Err(_) => Outcome::Raw(self.raw.bytes().clone()),
            },
        }
    }
}

impl Debug for PacketContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketContext")
            .field("name", &self.raw.name())
            .field("bound", &self.raw.bound())
            .field("client", &self.client.id())
            .field("accessed", &self.accessed)
            .field("canceled", &self.canceled)
            .finish()
    }
}

/// Runs every middleware in order. A middleware that fails or panics
/// cancels the packet and ends the chain.
pub async fn run_chain(chain: &[Arc<dyn PacketMiddleware>], ctx: &mut PacketContext) {
    for middleware in chain {
        let result = AssertUnwindSafe(middleware.on_packet(ctx))
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(action)) => ctx.apply(action),
            Ok(Err(e)) => {
                warn!(
                    log_type = LogType::Middleware.as_str(),
                    middleware = middleware.name(),
                    packet = ctx.name(),
                    client = %ctx.client.peer(),
                    "Middleware failed, dropping packet: {:#}", e
                );
                ctx.canceled = true;
                return;
            }
            Err(_) => {
                error!(
                    log_type = LogType::Middleware.as_str(),
                    middleware = middleware.name(),
                    packet = ctx.name(),
                    client = %ctx.client.peer(),
                    "Middleware panicked, dropping packet"
                );
                ctx.canceled = true;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mcproxy_protocol::Version;
    use mcproxy_protocol::mock::{JsonCodec, RecordingSocket};

    use super::*;

    fn context(name: &str, bytes: Bytes) -> PacketContext {
        let client = DownstreamClient::new(Arc::new(RecordingSocket::new("c", Version::V1_19_4)));
        let raw = Arc::new(RawPacket::new(Bound::Client, PacketMeta::play(name), bytes));
        PacketContext::new(client, raw, Arc::new(JsonCodec))
    }

    fn chat() -> PacketContext {
        context("chat", JsonCodec::encode(&Fields::new().with("message", "hi")))
    }

    fn action(a: MiddlewareAction) -> Arc<dyn PacketMiddleware> {
        from_fn("fixed", move |_| Ok(a.clone()))
    }

    #[tokio::test]
    async fn test_cancel_and_uncancel() {
        let mut ctx = chat();
        let chain = vec![
            action(MiddlewareAction::Cancel),
            action(MiddlewareAction::Pass),
            action(MiddlewareAction::Replace(Fields::new().with("message", "x"))),
        ];
        run_chain(&chain, &mut ctx).await;
        assert!(ctx.is_canceled());

        let mut ctx = chat();
        let chain = vec![
            action(MiddlewareAction::Cancel),
            action(MiddlewareAction::Uncancel),
        ];
        run_chain(&chain, &mut ctx).await;
        assert_eq!(
            ctx.into_outcome(true),
            Outcome::Raw(JsonCodec::encode(&Fields::new().with("message", "hi")))
        );
    }

    #[tokio::test]
    async fn test_later_middleware_sees_cancel_flag() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let observer = from_fn("observer", move |ctx| {
            if ctx.is_canceled() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(MiddlewareAction::Pass)
        });
        let mut ctx = chat();
        run_chain(&[action(MiddlewareAction::Cancel), observer], &mut ctx).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_cancels_and_stops_chain() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let chain = vec![
            from_fn("broken", |_| Err(anyhow::anyhow!("boom"))),
            action(MiddlewareAction::Uncancel),
            from_fn("after", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(MiddlewareAction::Pass)
            }),
        ];
        let mut ctx = chat();
        run_chain(&chain, &mut ctx).await;
        assert!(ctx.is_canceled());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let chain = vec![from_fn("panics", |_| panic!("middleware bug"))];
        let mut ctx = chat();
        run_chain(&chain, &mut ctx).await;
        assert_eq!(ctx.into_outcome(true), Outcome::Canceled);
    }

    #[tokio::test]
    async fn test_reading_fields_disables_raw_forwarding() {
        let reader = from_fn("reader", |ctx| {
            assert_eq!(ctx.fields()?.get_str("message"), Some("hi"));
            Ok(MiddlewareAction::Pass)
        });
        let mut ctx = chat();
        run_chain(&[reader], &mut ctx).await;
        assert_eq!(
            ctx.into_outcome(true),
            Outcome::Packet(Packet::new("chat", Fields::new().with("message", "hi")))
        );

        let ctx = chat();
        assert!(ctx.peek().is_ok());
        assert!(matches!(ctx.into_outcome(true), Outcome::Raw(_)));
    }

    #[tokio::test]
    async fn test_fields_mut_edits_are_forwarded() {
        let editor = from_fn("editor", |ctx| {
            ctx.fields_mut()?.insert("message", "edited");
            Ok(MiddlewareAction::Pass)
        });
        let mut ctx = chat();
        run_chain(&[editor], &mut ctx).await;
        match ctx.into_outcome(true) {
            Outcome::Packet(packet) => {
                assert_eq!(packet.fields.get_str("message"), Some("edited"))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_custom_payload_is_always_raw() {
        let bytes = JsonCodec::encode(&Fields::new().with("channel", "minecraft:brand"));
        let mut ctx = context("custom_payload", bytes.clone());
        ctx.fields().unwrap();
        assert_eq!(ctx.into_outcome(false), Outcome::Raw(bytes));
    }

    #[test]
    fn test_unparseable_packet_forwards_raw() {
        let bytes = Bytes::from_static(b"\x00\x01not json");
        let mut ctx = context("chat", bytes.clone());
        assert!(ctx.fields().is_err());
        assert_eq!(ctx.into_outcome(false), Outcome::Raw(bytes));
    }
}
