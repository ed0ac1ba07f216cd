//! # Skylink
//!
//! Real-time relay that pairs a running game with a companion controller.
//!
//! A session is created over HTTP and yields a short join code. The game and
//! the companion each open a WebSocket at `/ws` on the same address, join
//! with that code and their role, and from then on the relay forwards
//! commands one way and map updates the other. Companion abilities are metered per session; sessions expire on a
//! fixed deadline.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use skylink::prelude::*;
//!
//! # async fn start() -> Result<(), RelayError> {
//! let server = RelayServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod http;
mod router;
mod server;
mod stats;

pub use config::RelayConfig;
pub use error::RelayError;
pub use server::{RelayHandle, RelayServer, RelayServerBuilder};
pub use stats::{RoundTrips, StatsSnapshot};

pub use skylink_minimap as minimap;
pub use skylink_protocol as protocol;
pub use skylink_session as session;
pub use skylink_transport as transport;

pub mod prelude {
    pub use crate::{RelayConfig, RelayError, RelayHandle, RelayServer, RelayServerBuilder};
    pub use skylink_protocol::{AbilityKind, ClientMessage, ErrorReason, Role, ServerMessage};
    pub use skylink_session::{Clock, ManualClock, SessionConfig, SystemClock};
}
