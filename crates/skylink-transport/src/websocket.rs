//! WebSocket transport built on axum's upgrade extractor.
//!
//! The transport does not own a listener. [`WebSocketTransport::new`] hands
//! back an axum [`Router`] that performs upgrades on one path; the caller
//! merges it into whatever router serves its HTTP traffic, so request and
//! upgrade traffic share a port. Each upgrade runs in the HTTP server's
//! per-connection task, and finished connections are queued for
//! [`accept`](Transport::accept). A client that opens a socket and sends
//! nothing therefore only occupies its own task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Upgraded connections waiting for `accept`.
const ACCEPT_BACKLOG: usize = 128;

/// A WebSocket-based [`Transport`] fed by an upgrade route.
pub struct WebSocketTransport {
    incoming: mpsc::Receiver<WebSocketConnection>,
}

#[derive(Clone)]
struct Upgrader {
    tx: mpsc::Sender<WebSocketConnection>,
    max_message_bytes: usize,
}

impl WebSocketTransport {
    /// Creates the transport and the route that feeds it.
    ///
    /// Upgrades are served on `path` only; any other path falls through to
    /// the enclosing router (404 unless something else claims it). Frames
    /// and messages larger than `max_message_bytes` fail the read instead
    /// of being buffered.
    ///
    /// The router needs peer addresses, so it must be served with
    /// `into_make_service_with_connect_info::<SocketAddr>()`.
    pub fn new(path: &str, max_message_bytes: usize) -> (Self, Router) {
        let (tx, incoming) = mpsc::channel(ACCEPT_BACKLOG);
        let router = Router::new()
            .route(path, get(upgrade))
            .with_state(Upgrader {
                tx,
                max_message_bytes,
            });
        tracing::info!(path, max_message_bytes, "WebSocket upgrades enabled");
        (Self { incoming }, router)
    }
}

async fn upgrade(
    State(upgrader): State<Upgrader>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let limit = upgrader.max_message_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| async move {
            let conn = WebSocketConnection::new(socket, peer);
            let id = conn.id;
            tracing::debug!(%id, %peer, "accepted WebSocket connection");
            if upgrader.tx.send(conn).await.is_err() {
                tracing::debug!(%id, "transport dropped, discarding connection");
            }
        })
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        self.incoming
            .recv()
            .await
            .ok_or_else(|| TransportError::ConnectionClosed("upgrade route dropped".into()))
    }
}

/// A single WebSocket connection with independently locked halves.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: SocketAddr,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
    alive: AtomicBool,
}

impl WebSocketConnection {
    fn new(socket: WebSocket, peer: SocketAddr) -> Self {
        let (sink, stream) = socket.split();
        Self {
            id: ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            peer,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            alive: AtomicBool::new(true),
        }
    }

    async fn write(&self, msg: Message) -> Result<(), TransportError> {
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send_text(&self, text: &str) -> Result<(), Self::Error> {
        self.write(Message::Text(text.to_owned())).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        loop {
            let msg = self.stream.lock().await.next().await;
            match msg {
                Some(Ok(Message::Binary(data))) => {
                    self.alive.store(true, Ordering::Relaxed);
                    return Ok(Some(data));
                }
                Some(Ok(Message::Text(text))) => {
                    self.alive.store(true, Ordering::Relaxed);
                    return Ok(Some(text.into_bytes()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                    self.alive.store(true, Ordering::Relaxed);
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn ping(&self) -> Result<(), Self::Error> {
        self.write(Message::Ping(Vec::new())).await
    }

    fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
