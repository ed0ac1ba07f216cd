//! Session management for Skylink.
//!
//! This crate owns everything stateful about a pairing:
//!
//! 1. **Session store**: creating sessions, looking them up by code or
//!    reconnect token, attaching and detaching roles, expiry ([`SessionStore`])
//! 2. **Ability governance**: the ordered accept/reject policy for
//!    companion abilities ([`governor`])
//! 3. **Abuse limits**: sliding-window limiters for per-connection frame
//!    rates and per-origin session creation ([`SlidingWindow`],
//!    [`OriginThrottle`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Router (above)     ← attaches connections, consumes abilities, forwards
//!     ↕
//! Session Layer      ← this crate: the single in-memory authority
//!     ↕
//! Protocol Layer     ← Role, AbilityKind, ServerMessage
//! ```
//!
//! The store holds connections only as [`PeerLink`]s: a bounded queue into
//! the connection's writer task. Sending through a link never blocks, so
//! the store can be locked without ever waiting on the network.

mod clock;
mod error;
pub mod governor;
mod limits;
mod link;
mod rtt;
mod session;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::SessionError;
pub use governor::{AbilityPolicies, AbilityPolicy, AbilityUsage, BurstLimit, Rejection};
pub use limits::{OriginThrottle, RateLimit, SlidingWindow};
pub use link::PeerLink;
pub use rtt::RoundTripHistogram;
pub use session::{Session, SessionConfig};
pub use store::{AbilityOutcome, Attachment, Detachment, SessionStore};
