//! Unified error type for the relay.

use skylink_protocol::ProtocolError;
use skylink_session::SessionError;
use skylink_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls, so
/// the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, validation).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (unknown code, expired, throttled).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The HTTP control surface failed to bind or serve.
    #[error("http server: {0}")]
    Http(#[source] std::io::Error),
}
