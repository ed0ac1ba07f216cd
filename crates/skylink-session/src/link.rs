//! Outbound handles to live connections.

use std::sync::Arc;

use skylink_protocol::ServerMessage;
use skylink_transport::ConnectionId;
use tokio::sync::{mpsc, Notify};

/// A handle through which the store and router reach one connection.
///
/// Messages go into a bounded queue drained by the connection's writer
/// task. Every operation is non-blocking and reports failure as `false`:
/// a closed or saturated connection is not an error for the caller, and
/// the session carries on until the endpoint reconnects.
#[derive(Debug, Clone)]
pub struct PeerLink {
    id: ConnectionId,
    tx: mpsc::Sender<ServerMessage>,
    shutdown: Arc<Notify>,
}

impl PeerLink {
    /// Creates a link and the receiving half for the connection's writer.
    pub fn channel(
        id: ConnectionId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ServerMessage>, Arc<Notify>) {
        let (tx, rx) = mpsc::channel(capacity);
        let shutdown = Arc::new(Notify::new());
        let link = Self {
            id,
            tx,
            shutdown: Arc::clone(&shutdown),
        };
        (link, rx, shutdown)
    }

    /// The connection this link points at.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a message. Returns `false` if the connection is gone or its
    /// queue is full.
    pub fn send(&self, msg: ServerMessage) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(conn_id = %self.id, "outbound queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Asks the connection to terminate. The request is remembered even if
    /// the connection is not waiting for it yet.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    /// Returns `false` once the connection's writer has gone away.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}
