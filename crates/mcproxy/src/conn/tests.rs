use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mcproxy_config::SyncMarkerConfig;
use mcproxy_protocol::mock::{JsonCodec, RecordingSocket, Written};
use mcproxy_protocol::{Fields, PacketMeta, ProtocolState, Version};
use proptest::prelude::*;
use tokio::sync::{broadcast, mpsc};

use super::*;
use crate::game::{SharedGameState, Vec3, fixtures};
use crate::middleware::{MiddlewareAction, from_fn};
use crate::transform::CoordinateOffset;

struct Harness {
    conn: Conn,
    upstream: Arc<RecordingSocket>,
    game: Arc<SharedGameState>,
}

fn no_markers() -> SyncMarkerConfig {
    SyncMarkerConfig {
        enabled: false,
        ..Default::default()
    }
}

fn harness_with(options: ConnOptions) -> Harness {
    let upstream = Arc::new(RecordingSocket::new("server", Version::V1_19_4));
    let game = Arc::new(SharedGameState::spawned(fixtures::snapshot()));
    let conn = Conn::new(options, Arc::new(JsonCodec), upstream.clone(), game.clone());
    Harness {
        conn,
        upstream,
        game,
    }
}

fn harness() -> Harness {
    harness_with(ConnOptions::default().with_sync_marker(no_markers()))
}

fn client(label: &str, version: Version) -> (DownstreamClient, Arc<RecordingSocket>) {
    let socket = Arc::new(RecordingSocket::new(label, version));
    (DownstreamClient::new(socket.clone()), socket)
}

fn from_server(conn: &Conn, name: &str, fields: &Fields) {
    conn.on_server_raw(PacketMeta::play(name), JsonCodec::encode(fields));
}

fn from_client(conn: &Conn, client: &DownstreamClient, name: &str, fields: &Fields) {
    conn.handle_client_packet(client, PacketMeta::play(name), JsonCodec::encode(fields));
}

fn drain(events: &mut broadcast::Receiver<ConnEvent>) -> Vec<ConnEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn chat(message: &str) -> Fields {
    Fields::new().with("message", message)
}

#[tokio::test]
async fn test_attach_and_detach_are_idempotent() {
    let h = harness();
    let mut events = h.conn.subscribe();
    let (a, _) = client("a", Version::V1_19_4);

    h.conn.attach(&a, ClientMiddleware::default());
    h.conn.attach(&a, ClientMiddleware::default());
    assert_eq!(h.conn.attached_clients(), vec![a.clone()]);

    h.conn.detach(&a);
    h.conn.detach(&a);
    assert!(!h.conn.is_attached(&a));
    assert_eq!(
        drain(&mut events),
        vec![ConnEvent::Attached(a.id()), ConnEvent::Detached(a.id())]
    );
    assert!(matches!(
        h.conn.flush(&a).await,
        Err(ProxyError::NotAttached(id)) if id == a.id()
    ));
}

#[tokio::test]
async fn test_untouched_packets_are_forwarded_byte_for_byte() {
    let h = harness();
    let (a, socket) = client("a", Version::V1_19_4);
    h.conn.attach(&a, ClientMiddleware::default());

    let bytes = JsonCodec::encode(&chat("hello").with("position", 1i32));
    h.conn.on_server_raw(PacketMeta::play("chat"), bytes.clone());
    h.conn.flush(&a).await.unwrap();

    assert_eq!(socket.written(), vec![Written::Raw(bytes)]);
}

#[tokio::test]
async fn test_reserializes_without_optimization() {
    let h = harness_with(
        ConnOptions::default()
            .with_sync_marker(no_markers())
            .with_optimize_packet_write(false),
    );
    let (a, socket) = client("a", Version::V1_19_4);
    h.conn.attach(&a, ClientMiddleware::default());

    from_server(&h.conn, "chat", &chat("hello"));
    h.conn.flush(&a).await.unwrap();

    assert_eq!(
        socket.written(),
        vec![Written::Packet("chat".to_string(), chat("hello"))]
    );
}

#[tokio::test]
async fn test_nothing_delivered_outside_play() {
    let h = harness();
    let (a, socket) = client("a", Version::V1_19_4);
    h.conn.attach(&a, ClientMiddleware::default());

    h.conn.on_server_raw(
        PacketMeta::new(ProtocolState::Login, "success"),
        JsonCodec::encode(&Fields::new()),
    );
    socket.set_state(ProtocolState::Login);
    from_server(&h.conn, "chat", &chat("early"));
    h.conn.flush(&a).await.unwrap();
    assert!(socket.written().is_empty());
}

#[tokio::test]
async fn test_only_linked_client_reaches_upstream() {
    let h = harness();
    let (a, _) = client("a", Version::V1_19_4);
    let (b, _) = client("b", Version::V1_19_4);
    h.conn.link(&a, ClientMiddleware::default());
    h.conn.attach(&b, ClientMiddleware::default());

    from_client(&h.conn, &a, "chat", &chat("from a"));
    from_client(&h.conn, &b, "chat", &chat("from b"));
    h.conn.flush(&a).await.unwrap();
    h.conn.flush(&b).await.unwrap();

    assert_eq!(
        h.upstream.written(),
        vec![Written::Raw(JsonCodec::encode(&chat("from a")))]
    );
}

#[tokio::test]
async fn test_movement_from_linked_client_only_moves_the_bot() {
    let h = harness_with(
        ConnOptions::default()
            .with_sync_marker(no_markers())
            .with_offset(CoordinateOffset::from_chunks(2, 0)),
    );
    let (a, _) = client("a", Version::V1_19_4);
    let (b, _) = client("b", Version::V1_19_4);
    h.conn.link(&a, ClientMiddleware::default());
    h.conn.attach(&b, ClientMiddleware::default());
    let start = h.game.player().unwrap().position;

    let moved = |x: f64| {
        Fields::new()
            .with("x", x)
            .with("y", 70.0f64)
            .with("z", 2.0f64)
            .with("onGround", true)
    };
    for _ in 0..2 {
        from_client(&h.conn, &a, "position", &moved(1.0));
        from_client(&h.conn, &b, "position", &moved(50.0));
    }
    h.conn.flush(&a).await.unwrap();
    h.conn.flush(&b).await.unwrap();

    let written = h.upstream.written();
    assert_eq!(written.len(), 2);
    for packet in &written {
        assert_eq!(packet.name(), "position");
        assert_eq!(packet.fields().unwrap().get_f64("x"), Some(33.0));
    }
    assert_ne!(start, Vec3::new(33.0, 70.0, 2.0));
    assert_eq!(h.game.player().unwrap().position, Vec3::new(33.0, 70.0, 2.0));
}

#[tokio::test]
async fn test_linked_client_keep_alive_and_held_item() {
    let h = harness();
    let mut events = h.conn.subscribe();
    let (a, _) = client("a", Version::V1_19_4);
    h.conn.link(&a, ClientMiddleware::default());

    from_client(&h.conn, &a, "keep_alive", &Fields::new().with("keepAliveId", 5i64));
    from_client(&h.conn, &a, "held_item_slot", &Fields::new().with("slotId", 4i32));
    h.conn.flush(&a).await.unwrap();

    assert_eq!(h.upstream.names(), vec!["<raw>"]);
    assert_eq!(h.game.player().unwrap().quick_bar_slot, 4);
    assert!(drain(&mut events).contains(&ConnEvent::HeldItemSlotChanged {
        client: a.id(),
        slot: 4
    }));
}

#[tokio::test]
async fn test_catch_up_then_synthetic_teleport_confirm_is_swallowed() {
    let h = harness();
    let (a, socket) = client("a", Version::V1_19_4);
    h.conn.link(&a, ClientMiddleware::default());
    from_server(&h.conn, "login", &Fields::new().with("entityId", 42i32));

    h.conn.send_packets(&a).unwrap();
    h.conn.flush(&a).await.unwrap();
    let names = socket.names();
    assert_eq!(names[0], "<raw>");
    assert_eq!(names[1], "login");
    assert!(names.contains(&"position".to_string()));
    assert_eq!(a.pending_teleport(), Some(1));

    let confirm = Fields::new().with("teleportId", 1i32);
    from_client(&h.conn, &a, "teleport_confirm", &confirm);
    h.conn.flush(&a).await.unwrap();
    assert!(h.upstream.written().is_empty());
    assert_eq!(a.pending_teleport(), None);

    // A second confirm of the same id is the client's own business
    from_client(&h.conn, &a, "teleport_confirm", &confirm);
    h.conn.flush(&a).await.unwrap();
    assert_eq!(h.upstream.written().len(), 1);
}

#[tokio::test]
async fn test_lost_teleport_is_resent() {
    let h = harness_with(
        ConnOptions::default()
            .with_sync_marker(no_markers())
            .with_offset(CoordinateOffset::from_chunks(2, 0)),
    );
    let (b, socket) = client("b", Version::V1_19_4);
    h.conn.attach(&b, ClientMiddleware::default());

    from_client(&h.conn, &b, "teleport_confirm", &Fields::new().with("teleportId", 0i32));
    h.conn.flush(&b).await.unwrap();

    let written = socket.written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].name(), "position");
    let fields = written[0].fields().unwrap();
    assert_eq!(fields.get_f64("x"), Some(100.5 - 32.0));
    assert_eq!(fields.get_i64("teleportId"), Some(1));
    assert_eq!(b.pending_teleport(), Some(1));
    assert!(h.upstream.written().is_empty());
}

#[tokio::test]
async fn test_send_packets_errors_and_direct_write() {
    let h = harness();
    let (a, socket) = client("a", Version::V1_19_4);

    assert!(matches!(
        h.conn.send_packets(&a),
        Err(ProxyError::CatchUp(CatchUpError::MissingLogin))
    ));

    from_server(&h.conn, "login", &Fields::new().with("entityId", 42i32));
    h.conn.send_packets(&a).unwrap();
    assert_eq!(socket.names().first().map(String::as_str), Some("login"));

    h.game.replace(None);
    assert!(matches!(
        h.conn.send_packets(&a),
        Err(ProxyError::CatchUp(CatchUpError::NotSpawned))
    ));
}

fn legacy_section() -> Vec<u8> {
    // 4 bits per block, one palette entry, no data longs, block and sky light
    let mut section = vec![4u8, 1, 0, 0];
    section.extend_from_slice(&[0u8; 4096]);
    section
}

#[tokio::test]
async fn test_small_map_chunk_stays_one_packet() {
    let h = harness_with(
        ConnOptions::default()
            .with_sync_marker(no_markers())
            .with_offset(CoordinateOffset::from_chunks(1, 0)),
    );
    let (a, socket) = client("legacy", Version::V1_12_2);
    h.conn.attach(&a, ClientMiddleware::default());

    let mut data = legacy_section();
    data.extend_from_slice(&legacy_section());
    data.extend_from_slice(&[1u8; 256]);
    let packet = Fields::new()
        .with("x", 5i32)
        .with("z", 7i32)
        .with("groundUp", true)
        .with("bitMap", 0b11i32)
        .with("chunkData", Bytes::from(data.clone()))
        .with("blockEntities", Vec::<mcproxy_protocol::FieldValue>::new());
    from_server(&h.conn, "map_chunk", &packet);
    h.conn.flush(&a).await.unwrap();

    let written = socket.written();
    assert_eq!(written.len(), 1);
    let fields = written[0].fields().unwrap();
    assert_eq!(fields.get_i64("x"), Some(4));
    assert_eq!(fields.get_i64("z"), Some(7));
    assert_eq!(fields.get_bool("groundUp"), Some(true));
    assert_eq!(fields.get_i64("bitMap"), Some(0b11));
    assert_eq!(fields.get_bytes("chunkData").map(|d| d.to_vec()), Some(data));
}

#[tokio::test]
async fn test_sync_marker_every_twenty_packets() {
    let h = harness_with(ConnOptions::default().with_sync_marker(SyncMarkerConfig {
        enabled: true,
        every_packets: 20,
        interval: Duration::from_secs(3600),
    }));
    let (a, socket) = client("a", Version::V1_19_4);
    h.conn.attach(&a, ClientMiddleware::default());

    for i in 0..45 {
        from_server(&h.conn, "chat", &Fields::new().with("n", i));
    }
    h.conn.flush(&a).await.unwrap();

    let names = socket.names();
    assert_eq!(names.len(), 47);
    let markers: Vec<usize> = names
        .iter()
        .enumerate()
        .filter(|(_, n)| *n == "bundle_delimiter")
        .map(|(i, _)| i)
        .collect();
    assert_eq!(markers, vec![20, 41]);
}

#[tokio::test]
async fn test_proxy_writes_are_arbitrated_while_linked() {
    let h = harness();
    let (a, _) = client("a", Version::V1_19_4);
    h.conn.link(&a, ClientMiddleware::default());

    let upstream = h.conn.upstream();
    assert_eq!(upstream.write("chat", &chat("bot")).unwrap(), Delivery::Vetoed);
    assert_eq!(
        upstream.write("keep_alive", &Fields::new()).unwrap(),
        Delivery::Sent
    );
    assert!(!h.game.player().unwrap().physics_enabled);

    h.conn.unlink();
    assert_eq!(upstream.write("chat", &chat("bot")).unwrap(), Delivery::Sent);
    assert!(h.game.player().unwrap().physics_enabled);
    assert_eq!(h.upstream.names(), vec!["keep_alive", "chat"]);
}

#[tokio::test]
async fn test_failing_middleware_only_affects_its_client() {
    let h = harness();
    let (a, socket_a) = client("a", Version::V1_19_4);
    let (b, socket_b) = client("b", Version::V1_19_4);
    let failing = from_fn("failing", |_| Err(anyhow::anyhow!("nope")));
    h.conn.attach(&a, ClientMiddleware::new().to_client(failing));
    h.conn.attach(&b, ClientMiddleware::default());

    from_server(&h.conn, "chat", &chat("hi"));
    h.conn.flush(&a).await.unwrap();
    h.conn.flush(&b).await.unwrap();

    assert!(socket_a.written().is_empty());
    assert_eq!(socket_b.written().len(), 1);
}

#[tokio::test]
async fn test_client_middleware_can_uncancel() {
    let cancel = from_fn("cancel", |_| Ok(MiddlewareAction::Cancel));
    let uncancel = from_fn("uncancel", |_| Ok(MiddlewareAction::Uncancel));
    let h = harness_with(
        ConnOptions::default()
            .with_sync_marker(no_markers())
            .with_to_client_middleware(cancel),
    );
    let (a, socket_a) = client("a", Version::V1_19_4);
    let (b, socket_b) = client("b", Version::V1_19_4);
    h.conn.attach(&a, ClientMiddleware::new().to_client(uncancel));
    h.conn.attach(&b, ClientMiddleware::default());

    from_server(&h.conn, "chat", &chat("hi"));
    h.conn.flush(&a).await.unwrap();
    h.conn.flush(&b).await.unwrap();

    assert_eq!(socket_a.written().len(), 1);
    assert!(socket_b.written().is_empty());
}

#[tokio::test]
async fn test_custom_payload_always_raw() {
    let reader = from_fn("reader", |ctx| {
        ctx.fields()?;
        Ok(MiddlewareAction::Pass)
    });
    let h = harness_with(
        ConnOptions::default()
            .with_sync_marker(no_markers())
            .with_optimize_packet_write(false)
            .with_to_client_middleware(reader),
    );
    let (a, socket) = client("a", Version::V1_19_4);
    h.conn.attach(&a, ClientMiddleware::default());

    let bytes = JsonCodec::encode(&Fields::new().with("channel", "minecraft:brand"));
    h.conn
        .on_server_raw(PacketMeta::play("custom_payload"), bytes.clone());
    h.conn.flush(&a).await.unwrap();
    assert_eq!(socket.written(), vec![Written::Raw(bytes)]);
}

#[tokio::test]
async fn test_linking_another_client_unlinks_the_first() {
    let h = harness();
    let mut events = h.conn.subscribe();
    let (a, _) = client("a", Version::V1_19_4);
    let (b, _) = client("b", Version::V1_19_4);

    h.conn.link(&a, ClientMiddleware::default());
    h.conn.link(&b, ClientMiddleware::default());
    assert_eq!(h.conn.linked(), Some(b.clone()));
    assert!(h.conn.is_attached(&a));

    h.conn.detach(&b);
    assert_eq!(h.conn.linked(), None);
    assert!(!h.conn.upstream().is_arbitrated());

    assert_eq!(
        drain(&mut events),
        vec![
            ConnEvent::Attached(a.id()),
            ConnEvent::Linked(a.id()),
            ConnEvent::Unlinked(a.id()),
            ConnEvent::Attached(b.id()),
            ConnEvent::Linked(b.id()),
            ConnEvent::Unlinked(b.id()),
            ConnEvent::Detached(b.id()),
        ]
    );
}

#[tokio::test]
async fn test_disconnect_and_client_end() {
    let h = harness();
    let (a, _) = client("a", Version::V1_19_4);
    let (b, _) = client("b", Version::V1_19_4);
    h.conn.link(&a, ClientMiddleware::default());
    h.conn.attach(&b, ClientMiddleware::default());

    h.conn.handle_client_end(&b);
    assert!(!h.conn.is_attached(&b));
    assert!(h.conn.is_attached(&a));

    h.conn.disconnect();
    assert_eq!(h.upstream.ended().as_deref(), Some("conn: disconnect called"));
    assert!(h.conn.attached_clients().is_empty());
    assert!(h.conn.linked().is_none());
}

#[tokio::test]
async fn test_attach_after_disconnect_is_ignored() {
    let h = harness();
    let mut events = h.conn.subscribe();
    let (a, _) = client("a", Version::V1_19_4);
    h.conn.disconnect();
    drain(&mut events);

    h.conn.attach(&a, ClientMiddleware::default());
    h.conn.link(&a, ClientMiddleware::default());
    assert!(!h.conn.is_attached(&a));
    assert!(h.conn.linked().is_none());
    assert!(h.game.player().unwrap().physics_enabled);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_run_stops_on_upstream_close() {
    let h = harness();
    let mut events = h.conn.subscribe();
    let (a, _) = client("a", Version::V1_19_4);
    h.conn.attach(&a, ClientMiddleware::default());

    let (tx, rx) = mpsc::channel(8);
    let conn = h.conn.clone();
    let task = tokio::spawn(async move { conn.run(rx).await });

    tx.send(UpstreamEvent::Packet {
        meta: PacketMeta::play("login"),
        bytes: JsonCodec::encode(&Fields::new().with("dimension", -1i32)),
    })
    .await
    .unwrap();
    tx.send(UpstreamEvent::Closed {
        reason: "kicked".to_string(),
    })
    .await
    .unwrap();
    task.await.unwrap();

    assert!(!h.conn.is_attached(&a));
    assert!(h.conn.session().raw_login().is_some());
    assert!(!h.conn.session().has_sky_light());
    assert!(drain(&mut events).contains(&ConnEvent::UpstreamClosed {
        reason: "kicked".to_string()
    }));
}

#[tokio::test]
async fn test_upstream_abilities_drive_physics() {
    let h = harness();
    from_server(&h.conn, "abilities", &Fields::new().with("flags", 0b10i32));
    assert!(h.conn.session().is_flying());
    assert!(!h.game.player().unwrap().physics_enabled);

    from_server(&h.conn, "abilities", &Fields::new().with("flags", 0i32));
    assert!(h.game.player().unwrap().physics_enabled);
}

#[derive(Debug, Clone)]
enum Op {
    Attach(usize),
    Detach(usize),
    Link(usize),
    Unlink,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3usize).prop_map(Op::Attach),
        (0..3usize).prop_map(Op::Detach),
        (0..3usize).prop_map(Op::Link),
        Just(Op::Unlink),
    ]
}

proptest! {
    #[test]
    fn prop_linked_client_is_always_attached(ops in proptest::collection::vec(op(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = rt.enter();
        let h = harness();
        let clients: Vec<DownstreamClient> = (0..3)
            .map(|i| client(&format!("c{}", i), Version::V1_19_4).0)
            .collect();

        for op in ops {
            match op {
                Op::Attach(i) => h.conn.attach(&clients[i], ClientMiddleware::default()),
                Op::Detach(i) => h.conn.detach(&clients[i]),
                Op::Link(i) => h.conn.link(&clients[i], ClientMiddleware::default()),
                Op::Unlink => h.conn.unlink(),
            }

            let attached = h.conn.attached_clients();
            let linked = h.conn.linked();
            if let Some(linked) = &linked {
                prop_assert!(attached.contains(linked));
            }
            prop_assert_eq!(h.conn.upstream().is_arbitrated(), linked.is_some());

            let mut ids: Vec<_> = attached.iter().map(DownstreamClient::id).collect();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), attached.len());
        }
    }
}
