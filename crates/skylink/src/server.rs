//! `RelayServer` builder and server loop.
//!
//! This is the entry point for running a relay. It ties together all the
//! layers: transport → protocol → session → router, plus the HTTP control
//! surface and the expiry sweeper. HTTP requests and WebSocket upgrades are
//! served from one listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use skylink_protocol::{JsonCodec, Validator};
use skylink_session::{Clock, OriginThrottle, SessionConfig, SessionStore, SystemClock};
use skylink_transport::{Transport, WebSocketTransport};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::{self, Instant};

use crate::config::RelayConfig;
use crate::handler::handle_connection;
use crate::stats::{RelayStats, StatsSnapshot};
use crate::RelayError;

/// Shared server state passed to each connection handler task.
///
/// The store is the only shared mutable state that matters; everything
/// else is either immutable config or lock-free counters.
pub(crate) struct ServerState<C: Clock> {
    pub(crate) store: Mutex<SessionStore<C>>,
    pub(crate) throttle: Mutex<OriginThrottle>,
    pub(crate) validator: Validator,
    pub(crate) codec: JsonCodec,
    pub(crate) config: RelayConfig,
    pub(crate) stats: RelayStats,
    pub(crate) clock: C,
}

impl<C: Clock> ServerState<C> {
    /// Evicts expired sessions and terminates every connection still
    /// attached to them. Also forgets idle creation-throttle entries.
    pub(crate) async fn sweep_expired(&self) -> usize {
        let mut doomed = Vec::new();
        let evicted = {
            let mut store = self.store.lock().await;
            store.sweep_expired(|session| doomed.extend(session.links().cloned()))
        };
        for link in doomed {
            link.close();
        }
        RelayStats::add(&self.stats.sessions_expired, evicted as u64);

        let pruned = self.throttle.lock().await.prune_idle(self.clock.now_ms());
        if evicted > 0 || pruned > 0 {
            tracing::info!(evicted, pruned, "sweep finished");
        }
        evicted
    }

    pub(crate) async fn snapshot(&self) -> StatsSnapshot {
        let store = self.store.lock().await;
        let mut snapshot = self.stats.snapshot(store.len());
        snapshot.round_trips = store.round_trip_totals().into();
        snapshot
    }
}

/// Builder for configuring and starting a relay.
///
/// # Example
///
/// ```rust,no_run
/// use skylink::prelude::*;
///
/// # async fn start() -> Result<(), RelayError> {
/// let server = RelayServer::builder()
///     .bind("0.0.0.0:8080")
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct RelayServerBuilder<C: Clock = SystemClock> {
    config: RelayConfig,
    clock: C,
}

impl RelayServerBuilder<SystemClock> {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
            clock: SystemClock::new(),
        }
    }
}

impl Default for RelayServerBuilder<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock + Clone> RelayServerBuilder<C> {
    /// Replaces the whole configuration.
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to listen on.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn ws_path(mut self, path: &str) -> Self {
        self.config.ws_path = path.to_string();
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Runs the relay on a different clock. Tests use a
    /// [`ManualClock`](skylink_session::ManualClock) here.
    pub fn clock<D: Clock + Clone>(self, clock: D) -> RelayServerBuilder<D> {
        RelayServerBuilder {
            config: self.config,
            clock,
        }
    }

    /// Binds the listener and prepares the upgrade route.
    pub async fn build(self) -> Result<RelayServer<C>, RelayError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(RelayError::Http)?;
        let (transport, upgrades) = WebSocketTransport::new(
            &self.config.ws_path,
            self.config.frame_limits.ceiling(),
        );

        let state = Arc::new(ServerState {
            store: Mutex::new(SessionStore::with_clock(
                self.config.session.clone(),
                self.clock.clone(),
            )),
            throttle: Mutex::new(OriginThrottle::new(self.config.creation_rate)),
            validator: Validator::new(self.config.frame_limits),
            codec: JsonCodec,
            config: self.config,
            stats: RelayStats::default(),
            clock: self.clock,
        });

        Ok(RelayServer {
            listener,
            transport,
            upgrades,
            state,
        })
    }
}

/// A bound relay.
///
/// Call [`run()`](Self::run) to start serving.
pub struct RelayServer<C: Clock = SystemClock> {
    listener: TcpListener,
    transport: WebSocketTransport,
    upgrades: Router,
    state: Arc<ServerState<C>>,
}

impl RelayServer<SystemClock> {
    /// Creates a new builder.
    pub fn builder() -> RelayServerBuilder<SystemClock> {
        RelayServerBuilder::new()
    }
}

impl<C: Clock> RelayServer<C> {
    /// The address the relay is listening on.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle for inspecting the relay after `run` has taken it.
    pub fn handle(&self) -> RelayHandle<C> {
        RelayHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Runs the relay until the process is terminated.
    ///
    /// Spawns the HTTP server (which also performs upgrades) and the
    /// expiry sweeper, then spawns a handler task for each upgraded
    /// connection. Returns only if the HTTP server stops.
    pub async fn run(self) -> Result<(), RelayError> {
        let RelayServer {
            listener,
            mut transport,
            upgrades,
            state,
        } = self;

        tracing::info!(
            addr = %listener.local_addr().map_err(RelayError::Http)?,
            ws_path = %state.config.ws_path,
            "skylink relay running"
        );

        let app = crate::http::router(Arc::clone(&state)).merge(upgrades);
        tokio::spawn(async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service).await {
                tracing::error!(error = %e, "http server stopped");
            }
        });

        tokio::spawn(sweep_loop(Arc::clone(&state)));

        loop {
            let conn = transport.accept().await?;
            tokio::spawn(handle_connection(conn, Arc::clone(&state)));
        }
    }
}

async fn sweep_loop<C: Clock>(state: Arc<ServerState<C>>) {
    let period = state.config.sweep_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        state.sweep_expired().await;
    }
}

/// Read access to a running relay.
#[derive(Clone)]
pub struct RelayHandle<C: Clock = SystemClock> {
    state: Arc<ServerState<C>>,
}

impl<C: Clock> RelayHandle<C> {
    /// Current counters.
    pub async fn stats(&self) -> StatsSnapshot {
        self.state.snapshot().await
    }

    /// Runs an expiry sweep now instead of waiting for the next tick.
    pub async fn sweep_expired(&self) -> usize {
        self.state.sweep_expired().await
    }
}
