//! Error types for the protocol layer.
//!
//! Each crate in Skylink defines its own error enum. A `ProtocolError`
//! means the problem is in encoding or decoding, never in networking or
//! session state.

/// Errors that can occur while encoding outbound or validating inbound frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// An encoded frame is larger than the wire allows.
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    Oversized { size: usize, limit: usize },

    /// An inbound frame failed validation.
    #[error(transparent)]
    Rejected(#[from] ValidationError),
}

/// Why the [`Validator`](crate::Validator) refused an inbound frame.
///
/// The detail here is for logs only. Peers are told a generic
/// `invalid_message` so rejections reveal nothing about server state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The raw frame is larger than the limit for its type.
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },

    /// The frame is not valid JSON.
    #[error("malformed JSON: {0}")]
    Malformed(String),

    /// The top-level JSON value is not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// The object has no string `type` field.
    #[error("missing type discriminator")]
    MissingType,

    /// The `type` field names a message the relay does not know.
    #[error("unknown message type {0:?}")]
    UnknownType(String),

    /// The object carries a field its type does not declare.
    #[error("unexpected field {field:?} in {kind}")]
    UnexpectedField { kind: &'static str, field: String },

    /// A field of a flat message holds an array or object.
    #[error("field {field:?} in {kind} must be a scalar")]
    NotFlat { kind: &'static str, field: String },

    /// The fields do not match the declared types.
    #[error("invalid {kind}: {detail}")]
    Schema { kind: &'static str, detail: String },

    /// A field has the right type but lies outside its allowed range.
    #[error("{field} out of range in {kind}")]
    OutOfRange { kind: &'static str, field: &'static str },
}
