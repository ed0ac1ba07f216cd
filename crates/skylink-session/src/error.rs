//! Error types for the session layer.

use std::net::IpAddr;

use skylink_protocol::ErrorReason;

/// Errors that can occur during session management.
///
/// Lookups distinguish a session that never existed from one that expired,
/// because the two produce different messages for the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No live session matches the code or token.
    #[error("session not found")]
    NotFound,

    /// The session existed but its TTL has elapsed. It has been evicted.
    #[error("session expired")]
    Expired,

    /// The originating address already owns the maximum number of sessions.
    #[error("origin {origin} already owns {owned} sessions")]
    TooManySessions { origin: IpAddr, owned: usize },
}

impl SessionError {
    /// The reason code sent to the peer for this error.
    pub fn reason(&self) -> ErrorReason {
        match self {
            Self::NotFound | Self::TooManySessions { .. } => ErrorReason::SessionNotFound,
            Self::Expired => ErrorReason::SessionExpired,
        }
    }
}
