//! Wire protocol for Skylink.
//!
//! This crate defines the "language" the relay, the game, and the companion
//! speak:
//!
//! - **Types** ([`ClientMessage`], [`ServerMessage`], [`Role`],
//!   [`AbilityKind`], [`GamePhase`]): the flat JSON objects that travel on
//!   the wire, discriminated by a `type` field.
//! - **Minimap frames** ([`MinimapFull`], [`MinimapDelta`]): quantized
//!   full/delta snapshots and the [`quantize`]/[`dequantize`] pair.
//! - **Validation** ([`Validator`]): the single chokepoint every inbound
//!   frame passes before any stateful code sees it.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): outbound encoding.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Validator (ClientMessage) → Router (session state)
//!                                                     ↓
//! Transport (bytes) ← Codec      (ServerMessage) ←────┘
//! ```

mod codec;
mod error;
mod minimap;
mod types;
mod validate;

pub use codec::{Codec, JsonCodec};
pub use error::{ProtocolError, ValidationError};
pub use minimap::{
    dequantize, quantize, GroupDelta, MinimapDelta, MinimapFull, WireEntity,
    WirePoint, MAX_ENTITY_ID_LEN, MAX_GROUP_ENTITIES, MINIMAP_VERSION,
    QUANT_MAX,
};
pub use types::{
    AbilityKind, ClientMessage, ErrorReason, GamePhase, Impact, Join,
    NewWave, Ping, Point, Rejoin, Role, ServerMessage, StateChange,
};
pub use validate::{FrameLimits, Validator};
