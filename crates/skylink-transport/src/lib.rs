//! Transport abstraction layer for Skylink.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over
//! the persistent bidirectional connections game and companion endpoints
//! hold with the relay.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via axum's upgrade route

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::net::SocketAddr;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    ///
    /// Returns an error once no further connections can arrive.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;
}

/// A single connection that can send and receive frames.
///
/// Reads and writes are independent: a task blocked in [`recv`](Self::recv)
/// never prevents another task from sending on the same connection.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends a text frame to the remote peer.
    ///
    /// Browser endpoints read JSON from text frames, so this is what the
    /// relay uses for every outbound message.
    async fn send_text(&self, text: &str) -> Result<(), Self::Error>;

    /// Receives the next data frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed. Control
    /// frames are consumed internally and only refresh the liveness flag.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Sends a WebSocket ping. The peer's answer sets the liveness flag.
    async fn ping(&self) -> Result<(), Self::Error>;

    /// Returns whether the peer showed any sign of life since the last
    /// call, and clears the flag.
    fn take_alive(&self) -> bool;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the remote address of the peer.
    fn peer_addr(&self) -> SocketAddr;
}
