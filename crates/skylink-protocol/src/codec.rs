//! Codec trait and the JSON implementation.
//!
//! The relay encodes every outbound [`ServerMessage`](crate::ServerMessage)
//! through a [`Codec`]. Inbound frames never take this path: they go through
//! the [`Validator`](crate::Validator), which is stricter than a plain decode.

use serde::Serialize;

use crate::ProtocolError;

/// Turns outbound values into wire bytes.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Encodes a value and refuses the result if it exceeds `limit` bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Oversized` for frames over the limit.
    fn encode_bounded<T: Serialize>(
        &self,
        value: &T,
        limit: usize,
    ) -> Result<Vec<u8>, ProtocolError> {
        let bytes = self.encode(value)?;
        if bytes.len() > limit {
            return Err(ProtocolError::Oversized {
                size: bytes.len(),
                limit,
            });
        }
        Ok(bytes)
    }
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Both endpoints are browser pages, so JSON is the only format on the wire.
///
/// ## Example
///
/// ```rust
/// use skylink_protocol::{Codec, JsonCodec, ServerMessage};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&ServerMessage::GameConnected).unwrap();
/// assert_eq!(bytes, br#"{"type":"game_connected"}"#);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }
}
