//! Relay configuration.

use std::time::Duration;

use skylink_protocol::{FrameLimits, Role};
use skylink_session::{RateLimit, SessionConfig, SlidingWindow};

/// Everything the relay can be tuned with. Defaults are production values.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address for both the HTTP control surface (`/health`,
    /// `/session/create`, `/stats`) and WebSocket upgrades.
    pub bind_addr: String,

    /// The only path upgrades are accepted on.
    pub ws_path: String,

    pub frame_limits: FrameLimits,

    /// Inbound frame rate for game connections. The game streams minimap
    /// frames, so this is generous.
    pub game_rate: RateLimit,

    /// Inbound frame rate for companion connections, and for any
    /// connection that has not joined yet.
    pub companion_rate: RateLimit,

    /// Session creation attempts per originating address.
    pub creation_rate: RateLimit,

    /// How often each connection is pinged. A connection that showed no
    /// sign of life for a whole interval is terminated.
    pub heartbeat_interval: Duration,

    /// How often expired sessions are swept.
    pub sweep_interval: Duration,

    /// Capacity of each connection's outbound queue. Frames beyond it are
    /// dropped rather than buffered.
    pub outbound_queue: usize,

    pub session: SessionConfig,
}

impl RelayConfig {
    /// A fresh inbound limiter for a connection in `role`, or for one that
    /// has not joined.
    pub fn limiter_for(&self, role: Option<Role>) -> SlidingWindow {
        match role {
            Some(Role::Game) => SlidingWindow::new(self.game_rate),
            Some(Role::Companion) | None => SlidingWindow::new(self.companion_rate),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            ws_path: "/ws".to_string(),
            frame_limits: FrameLimits::default(),
            game_rate: RateLimit::new(1200, Duration::from_secs(10)),
            companion_rate: RateLimit::new(120, Duration::from_secs(10)),
            creation_rate: RateLimit::new(10, Duration::from_secs(60)),
            heartbeat_interval: Duration::from_secs(25),
            sweep_interval: Duration::from_secs(60),
            outbound_queue: 256,
            session: SessionConfig::default(),
        }
    }
}
