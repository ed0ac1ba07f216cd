//! Integration tests for the relay: HTTP control surface, pairing, and the
//! full companion ↔ game message flow over real sockets.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use skylink::minimap::{ApplyOutcome, DeltaEncoder, Frame, MinimapStore, Snapshot, SnapshotEntity};
use skylink::prelude::*;
use skylink::protocol::{FrameLimits, Join, Ping, Point, Rejoin};
use skylink::session::RateLimit;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

// =========================================================================
// Helpers
// =========================================================================

struct Running<C: Clock> {
    addr: String,
    handle: RelayHandle<C>,
}

async fn start<C: Clock + Clone>(builder: RelayServerBuilder<C>) -> Running<C> {
    let server = builder
        .bind("127.0.0.1:0")
        .build()
        .await
        .expect("server should build");

    let running = Running {
        addr: server.local_addr().expect("local addr").to_string(),
        handle: server.handle(),
    };

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    running
}

async fn start_server() -> Running<SystemClock> {
    start(RelayServer::builder()).await
}

/// Minimal HTTP/1.1 request. Returns the status code and the JSON body.
async fn http(addr: &str, method: &str, path: &str) -> (u16, Value) {
    let mut stream = TcpStream::connect(addr).await.expect("http connect");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.expect("write");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("read");
    let text = String::from_utf8(raw).expect("utf8 response");
    let (head, body) = text.split_once("\r\n\r\n").expect("header terminator");
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status code");
    (status, serde_json::from_str(body).expect("json body"))
}

async fn create_session(running: &Running<impl Clock>) -> (String, String) {
    let (status, body) = http(&running.addr, "POST", "/session/create").await;
    assert_eq!(status, 200, "unexpected body {body}");
    (
        body["code"].as_str().expect("code").to_string(),
        body["token"].as_str().expect("token").to_string(),
    )
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("should connect");
    ws
}

async fn send(ws: &mut ClientWs, msg: &ClientMessage) {
    let text = serde_json::to_string(msg).expect("encode");
    ws.send(Message::Text(text.into())).await.expect("send");
}

/// Next relay message, skipping control frames.
async fn recv(ws: &mut ClientWs) -> ServerMessage {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .expect("recv");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("decode"),
            Message::Binary(data) => return serde_json::from_slice(&data).expect("decode"),
            Message::Close(frame) => panic!("closed by relay: {frame:?}"),
            _ => continue,
        }
    }
}

async fn ping(ws: &mut ClientWs, t: u64, rtt: Option<f64>) {
    send(ws, &ClientMessage::Ping(Ping { t, rtt })).await;
}

/// Asserts nothing but control frames arrive within `wait`.
async fn expect_silence(ws: &mut ClientWs, wait: Duration) {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(other) => panic!("expected silence, got {other:?}"),
        }
    }
}

/// Waits until the relay closes the socket.
async fn expect_closed(ws: &mut ClientWs) {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("socket was not closed");
        match next {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(_)) => continue,
        }
    }
}

async fn join(ws: &mut ClientWs, code: &str, role: Role) -> ServerMessage {
    send(
        ws,
        &ClientMessage::Join(Join {
            code: code.to_string(),
            role,
        }),
    )
    .await;
    recv(ws).await
}

/// A session with both roles attached and the connect notices consumed.
async fn paired(running: &Running<impl Clock>) -> (String, ClientWs, ClientWs) {
    let (code, _) = create_session(running).await;
    let mut game = connect(&running.addr).await;
    let mut companion = connect(&running.addr).await;

    assert!(matches!(join(&mut game, &code, Role::Game).await, ServerMessage::Joined { .. }));
    assert!(matches!(
        join(&mut companion, &code, Role::Companion).await,
        ServerMessage::Joined { .. }
    ));
    assert_eq!(recv(&mut companion).await, ServerMessage::GameConnected);
    assert_eq!(recv(&mut game).await, ServerMessage::CompanionConnected);
    (code, game, companion)
}

fn snapshot(step: u32) -> Snapshot {
    let y = f64::from(step) * 0.1;
    Snapshot {
        enemies: vec![
            SnapshotEntity::new("boss", 0.5, y).boss(),
            SnapshotEntity::new("grunt", 0.25, 0.75),
        ],
        allies: vec![],
        players: vec![SnapshotEntity::new("p1", 0.1, 0.2)],
        chopper: Some((0.4, y)),
    }
}

fn frame_message(frame: Frame) -> ClientMessage {
    match frame {
        Frame::Full(f) => ClientMessage::MinimapFull(f),
        Frame::Delta(d) => ClientMessage::MinimapDelta(d),
    }
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_health_returns_ok() {
    let running = start_server().await;
    let (status, body) = http(&running.addr, "GET", "/health").await;
    assert_eq!(status, 200);
    assert_eq!(body, serde_json::json!({ "ok": true }));
}

#[tokio::test]
async fn test_create_session_returns_code_and_token() {
    let running = start_server().await;
    let (code, token) = create_session(&running).await;
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    assert!(!token.is_empty());

    let (status, body) = http(&running.addr, "GET", "/session/create").await;
    assert_eq!(status, 200);
    assert_ne!(body["code"].as_str(), Some(code.as_str()));
}

#[tokio::test]
async fn test_create_session_past_origin_cap_refused() {
    let running = start(RelayServer::builder().session_config(SessionConfig {
        max_sessions_per_origin: 1,
        ..SessionConfig::default()
    }))
    .await;
    create_session(&running).await;

    let (status, body) = http(&running.addr, "POST", "/session/create").await;
    assert_eq!(status, 429);
    assert_eq!(body["error"], "too_many_sessions");
}

#[tokio::test]
async fn test_wrong_path_upgrade_refused() {
    let running = start_server().await;
    let result =
        tokio_tungstenite::connect_async(format!("ws://{}/elsewhere", running.addr)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_pairing_notifies_both_sides() {
    let running = start_server().await;
    let (code, token) = create_session(&running).await;
    let mut game = connect(&running.addr).await;

    match join(&mut game, &code.to_ascii_lowercase(), Role::Game).await {
        ServerMessage::Joined {
            code: joined,
            token: issued,
            role,
        } => {
            assert_eq!(joined, code);
            assert_eq!(issued, token);
            assert_eq!(role, Role::Game);
        }
        other => panic!("expected joined, got {other:?}"),
    }

    let mut companion = connect(&running.addr).await;
    assert!(matches!(
        join(&mut companion, &code, Role::Companion).await,
        ServerMessage::Joined { role: Role::Companion, .. }
    ));
    assert_eq!(recv(&mut companion).await, ServerMessage::GameConnected);
    assert_eq!(recv(&mut game).await, ServerMessage::CompanionConnected);
}

#[tokio::test]
async fn test_join_unknown_code_returns_session_not_found() {
    let running = start_server().await;
    let mut ws = connect(&running.addr).await;
    assert_eq!(
        join(&mut ws, "ZZZZZZ", Role::Companion).await,
        ServerMessage::error(ErrorReason::SessionNotFound)
    );
}

#[tokio::test]
async fn test_invalid_frame_reported_and_connection_survives() {
    let running = start_server().await;
    let mut ws = connect(&running.addr).await;

    ws.send(Message::Text("not json".into())).await.expect("send");
    assert_eq!(recv(&mut ws).await, ServerMessage::error(ErrorReason::InvalidMessage));

    send(&mut ws, &ClientMessage::Ping(Ping { t: 99, rtt: None })).await;
    match recv(&mut ws).await {
        ServerMessage::Pong { t, server_time } => {
            assert_eq!(t, 99);
            assert!(server_time > 0);
        }
        other => panic!("expected pong, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bomb_drop_reaches_game_and_acks_companion() {
    let running = start_server().await;
    let (_, mut game, mut companion) = paired(&running).await;

    send(&mut companion, &ClientMessage::HelicopterDrop(Point { x: 0.25, y: 0.75 })).await;

    assert_eq!(recv(&mut game).await, ServerMessage::BombDrop { x: 0.25, y: 0.75 });
    assert_eq!(
        recv(&mut companion).await,
        ServerMessage::DropAck {
            ability: AbilityKind::Bomb,
            x: 0.25,
            y: 0.75,
            remaining: 1,
        }
    );

    send(&mut companion, &ClientMessage::HelicopterDrop(Point { x: 0.5, y: 0.5 })).await;
    assert_eq!(
        recv(&mut companion).await,
        ServerMessage::Error {
            reason: ErrorReason::CooldownActive,
            ability: Some(AbilityKind::Bomb),
        }
    );

    let stats = running.handle.stats().await;
    assert_eq!(stats.abilities_accepted, 1);
    assert_eq!(stats.abilities_rejected, 1);
    assert_eq!(stats.sessions_live, 1);
}

#[tokio::test]
async fn test_drop_without_game_returns_no_peer() {
    let running = start_server().await;
    let (code, _) = create_session(&running).await;
    let mut companion = connect(&running.addr).await;
    join(&mut companion, &code, Role::Companion).await;

    send(&mut companion, &ClientMessage::SupplyDrop(Point { x: 0.1, y: 0.1 })).await;
    assert_eq!(
        recv(&mut companion).await,
        ServerMessage::Error {
            reason: ErrorReason::NoPeer,
            ability: Some(AbilityKind::Supply),
        }
    );
}

#[tokio::test]
async fn test_game_only_message_from_companion_not_permitted() {
    let running = start_server().await;
    let (_, _game, mut companion) = paired(&running).await;

    send(&mut companion, &ClientMessage::NewWave(Default::default())).await;
    assert_eq!(recv(&mut companion).await, ServerMessage::error(ErrorReason::NotPermitted));
}

#[tokio::test]
async fn test_minimap_frames_forwarded_and_applied() {
    let running = start_server().await;
    let (_, mut game, mut companion) = paired(&running).await;

    let mut encoder = DeltaEncoder::default();
    let mut store = MinimapStore::new();
    let mut last_relay_seq = 0;

    for step in 0..4 {
        let snap = snapshot(step);
        send(&mut game, &frame_message(encoder.encode(&snap))).await;

        let outcome = match recv(&mut companion).await {
            ServerMessage::MinimapFull(full) => {
                let relay_seq = full.relay_seq.expect("stamped");
                assert!(relay_seq > last_relay_seq);
                last_relay_seq = relay_seq;
                store.apply_full(&full)
            }
            ServerMessage::MinimapDelta(delta) => {
                let relay_seq = delta.relay_seq.expect("stamped");
                assert!(relay_seq > last_relay_seq);
                last_relay_seq = relay_seq;
                store.apply_delta(&delta)
            }
            other => panic!("expected minimap frame, got {other:?}"),
        };
        assert!(matches!(outcome, ApplyOutcome::Applied { .. }));
    }

    assert!(store.is_synced());
    assert_eq!(store.view().enemies.len(), 2);
    assert!(store.view().enemies["boss"].boss);
}

#[tokio::test]
async fn test_companion_disconnect_notifies_game() {
    let running = start_server().await;
    let (_, mut game, mut companion) = paired(&running).await;

    companion.close(None).await.expect("close");
    assert_eq!(recv(&mut game).await, ServerMessage::CompanionDisconnected);
}

#[tokio::test]
async fn test_rejoin_by_token_restores_companion() {
    let running = start_server().await;
    let (code, token) = create_session(&running).await;
    let mut game = connect(&running.addr).await;
    join(&mut game, &code, Role::Game).await;

    let mut companion = connect(&running.addr).await;
    join(&mut companion, &code, Role::Companion).await;
    recv(&mut companion).await;
    recv(&mut game).await;
    companion.close(None).await.expect("close");
    assert_eq!(recv(&mut game).await, ServerMessage::CompanionDisconnected);

    let mut again = connect(&running.addr).await;
    send(
        &mut again,
        &ClientMessage::Rejoin(Rejoin {
            token,
            role: Role::Companion,
        }),
    )
    .await;
    assert!(matches!(
        recv(&mut again).await,
        ServerMessage::Joined { code: ref c, .. } if *c == code
    ));
    assert_eq!(recv(&mut again).await, ServerMessage::GameConnected);
    assert_eq!(recv(&mut game).await, ServerMessage::CompanionConnected);
}

#[tokio::test]
async fn test_expired_session_swept_and_sockets_closed() {
    let clock = ManualClock::new(0);
    let running = start(
        RelayServer::builder()
            .session_config(SessionConfig {
                ttl: Duration::from_secs(60),
                ..SessionConfig::default()
            })
            .clock(clock.clone()),
    )
    .await;
    let (code, mut game, mut companion) = paired(&running).await;

    clock.advance(Duration::from_secs(61));
    assert_eq!(running.handle.sweep_expired().await, 1);

    expect_closed(&mut game).await;
    expect_closed(&mut companion).await;

    let mut late = connect(&running.addr).await;
    assert_eq!(
        join(&mut late, &code, Role::Companion).await,
        ServerMessage::error(ErrorReason::SessionNotFound)
    );
    assert_eq!(running.handle.stats().await.sessions_expired, 1);
}

#[tokio::test]
async fn test_http_and_upgrade_share_one_listener() {
    let running = start_server().await;
    let (status, _) = http(&running.addr, "GET", "/health").await;
    assert_eq!(status, 200);

    let mut ws = connect(&running.addr).await;
    ping(&mut ws, 5, None).await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::Pong { t: 5, .. }));
}

#[tokio::test]
async fn test_idle_sockets_do_not_delay_real_client() {
    let running = start_server().await;

    let mut idle = Vec::new();
    for _ in 0..8 {
        idle.push(TcpStream::connect(&running.addr).await.expect("raw connect"));
    }

    let (mut ws, _) = tokio::time::timeout(
        Duration::from_secs(1),
        tokio_tungstenite::connect_async(format!("ws://{}/ws", running.addr)),
    )
    .await
    .expect("upgrade stalled behind idle sockets")
    .expect("should connect");

    let (code, _) = create_session(&running).await;
    assert!(matches!(
        join(&mut ws, &code, Role::Game).await,
        ServerMessage::Joined { .. }
    ));
    drop(idle);
}

#[tokio::test]
async fn test_frame_over_transport_cap_closes_connection() {
    let running = start_server().await;
    let mut ws = connect(&running.addr).await;

    let oversized = "x".repeat(FrameLimits::default().ceiling() + 1);
    // The relay may drop the socket before the write completes.
    let _ = ws.send(Message::Text(oversized.into())).await;
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_flood_past_rate_limit_dropped_silently_and_connection_survives() {
    let window = Duration::from_millis(500);
    let running = start(RelayServer::builder().config(RelayConfig {
        companion_rate: RateLimit::new(3, window),
        ..RelayConfig::default()
    }))
    .await;
    let mut ws = connect(&running.addr).await;

    for t in 1..=5 {
        ping(&mut ws, t, None).await;
    }
    for t in 1..=3 {
        assert!(matches!(recv(&mut ws).await, ServerMessage::Pong { t: got, .. } if got == t));
    }
    expect_silence(&mut ws, Duration::from_millis(200)).await;
    assert_eq!(running.handle.stats().await.frames_rate_limited, 2);

    tokio::time::sleep(window).await;
    ping(&mut ws, 6, None).await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::Pong { t: 6, .. }));
}

#[tokio::test]
async fn test_unanswered_heartbeat_terminates_and_notifies_peer() {
    let running = start(RelayServer::builder().heartbeat_interval(Duration::from_millis(200))).await;
    let (code, mut game, mut companion) = paired(&running).await;

    // The game socket is no longer polled, so the relay's pings go unanswered.
    assert_eq!(recv(&mut companion).await, ServerMessage::GameDisconnected);
    expect_closed(&mut game).await;

    let mut replacement = connect(&running.addr).await;
    assert!(matches!(
        join(&mut replacement, &code, Role::Game).await,
        ServerMessage::Joined { role: Role::Game, .. }
    ));
    assert_eq!(recv(&mut companion).await, ServerMessage::GameConnected);
}

#[tokio::test]
async fn test_reported_round_trips_appear_in_stats() {
    let running = start_server().await;
    let (_, _game, mut companion) = paired(&running).await;

    for (t, rtt) in [(1, 20.0), (2, 180.0), (3, 1500.0)] {
        ping(&mut companion, t, Some(rtt)).await;
        assert!(matches!(recv(&mut companion).await, ServerMessage::Pong { .. }));
    }

    let (status, body) = http(&running.addr, "GET", "/stats").await;
    assert_eq!(status, 200);
    assert_eq!(body["round_trips"]["under_50ms"], 1);
    assert_eq!(body["round_trips"]["under_250ms"], 1);
    assert_eq!(body["round_trips"]["from_1000ms"], 1);
    assert_eq!(body["round_trips"]["under_100ms"], 0);
}
