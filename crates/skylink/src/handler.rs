//! Per-connection handler: frame intake, heartbeat, and outbound writes.
//!
//! Each accepted connection gets two Tokio tasks:
//!   1. The reader (this handler): rate limit → validate → route, plus the
//!      heartbeat and the relay's termination signal, in one `select!` loop
//!   2. The writer: drains the connection's outbound queue onto the socket
//!
//! The store lock is held only while routing. Deliveries go out after it is
//! released, into bounded queues, so a slow peer can never stall the relay.

use std::sync::Arc;

use skylink_protocol::{Codec, ErrorReason, ServerMessage};
use skylink_session::{Clock, PeerLink, SlidingWindow};
use skylink_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::router::{self, ConnContext, Delivery};
use crate::server::ServerState;
use crate::stats::{bump, RelayStats};

/// Drop guard that detaches the connection's role when the handler exits.
///
/// This ensures cleanup happens even if the handler panics. Since `Drop`
/// is synchronous, we spawn a fire-and-forget task for the async lock.
struct DetachGuard<C: Clock> {
    ctx: ConnContext,
    state: Arc<ServerState<C>>,
}

impl<C: Clock> Drop for DetachGuard<C> {
    fn drop(&mut self) {
        self.state.stats.connection_closed();
        let Some(joined) = self.ctx.joined.take() else {
            return;
        };
        let mut ctx = ConnContext {
            conn_id: self.ctx.conn_id,
            joined: Some(joined),
        };
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let deliveries = {
                let mut store = state.store.lock().await;
                router::leave(&mut store, &mut ctx)
            };
            dispatch(&state.stats, deliveries);
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C: Clock>(
    conn: WebSocketConnection,
    state: Arc<ServerState<C>>,
) {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    bump(&state.stats.connections_opened);
    bump(&state.stats.connections_active);
    tracing::debug!(%conn_id, peer = %conn.peer_addr(), "handling new connection");

    let (link, rx, shutdown) = PeerLink::channel(conn_id, state.config.outbound_queue);
    let writer = tokio::spawn(write_loop(Arc::clone(&conn), rx, Arc::clone(&state)));

    let mut guard = DetachGuard {
        ctx: ConnContext::new(conn_id),
        state: Arc::clone(&state),
    };
    let mut limiter = state.config.limiter_for(None);

    let period = state.config.heartbeat_interval;
    let mut heartbeat = time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            frame = conn.recv() => match frame {
                Ok(Some(data)) => {
                    let before = guard.ctx.role();
                    on_frame(&state, &mut guard.ctx, &link, &mut limiter, &data).await;
                    if guard.ctx.role() != before {
                        limiter = state.config.limiter_for(guard.ctx.role());
                    }
                }
                Ok(None) => {
                    tracing::debug!(%conn_id, "connection closed cleanly");
                    break;
                }
                Err(e) => {
                    tracing::debug!(%conn_id, error = %e, "recv error");
                    break;
                }
            },
            _ = heartbeat.tick() => {
                if !conn.take_alive() {
                    tracing::info!(%conn_id, "no heartbeat answer, terminating");
                    break;
                }
                if let Err(e) = conn.ping().await {
                    tracing::debug!(%conn_id, error = %e, "ping failed");
                    break;
                }
            }
            () = shutdown.notified() => {
                tracing::info!(%conn_id, "terminated by relay");
                break;
            }
        }
    }

    writer.abort();
    if let Err(e) = conn.close().await {
        tracing::trace!(%conn_id, error = %e, "close after shutdown");
    }
    // guard drops here → role detach fires.
}

/// Rate limit, validate, and route one inbound frame.
async fn on_frame<C: Clock>(
    state: &ServerState<C>,
    ctx: &mut ConnContext,
    link: &PeerLink,
    limiter: &mut SlidingWindow,
    data: &[u8],
) {
    bump(&state.stats.frames_received);

    if !limiter.try_acquire(state.clock.now_ms()) {
        bump(&state.stats.frames_rate_limited);
        tracing::debug!(conn_id = %ctx.conn_id, "rate limit exceeded, dropping frame");
        return;
    }

    let msg = match state.validator.validate(data) {
        Ok(msg) => msg,
        Err(e) => {
            bump(&state.stats.frames_rejected);
            tracing::debug!(conn_id = %ctx.conn_id, error = %e, "frame rejected");
            dispatch(
                &state.stats,
                vec![(link.clone(), ServerMessage::error(ErrorReason::InvalidMessage))],
            );
            return;
        }
    };

    let deliveries = {
        let mut store = state.store.lock().await;
        router::route(&mut store, ctx, link, msg, &state.stats)
    };
    dispatch(&state.stats, deliveries);
}

/// Queues each delivery on its target connection.
fn dispatch(stats: &RelayStats, deliveries: Vec<Delivery>) {
    for (target, msg) in deliveries {
        if target.send(msg) {
            bump(&stats.messages_sent);
        } else {
            bump(&stats.messages_dropped);
        }
    }
}

/// Drains the outbound queue onto the socket until either side goes away.
async fn write_loop<C: Clock>(
    conn: Arc<WebSocketConnection>,
    mut rx: mpsc::Receiver<ServerMessage>,
    state: Arc<ServerState<C>>,
) {
    let conn_id = conn.id();
    let limit = state.config.frame_limits.max_snapshot_bytes;
    while let Some(msg) = rx.recv().await {
        let bytes = match state.codec.encode_bounded(&msg, limit) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%conn_id, error = %e, "dropping outbound frame");
                bump(&state.stats.messages_dropped);
                continue;
            }
        };
        if let Err(e) = conn.send_text(&String::from_utf8_lossy(&bytes)).await {
            tracing::debug!(%conn_id, error = %e, "send failed");
            break;
        }
    }
}
