//! Core message types for Skylink's wire format.
//!
//! Every message is a flat JSON object with a string `type` discriminator,
//! for example `{"type":"helicopter_drop","x":0.5,"y":0.25}`. Inbound
//! messages ([`ClientMessage`]) are only ever produced by the
//! [`Validator`](crate::Validator); outbound messages ([`ServerMessage`])
//! are encoded by a [`Codec`](crate::Codec).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::minimap::{MinimapDelta, MinimapFull};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Which end of a session a connection speaks for.
///
/// A session binds at most one connection per role at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The primary display running the actual game.
    Game,
    /// The secondary controller that triggers abilities and shows the minimap.
    Companion,
}

impl Role {
    /// Returns the opposite role.
    pub fn peer(self) -> Self {
        match self {
            Self::Game => Self::Companion,
            Self::Companion => Self::Game,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Game => "game",
            Self::Companion => "companion",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AbilityKind
// ---------------------------------------------------------------------------

/// A budget- and cooldown-limited action the companion can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbilityKind {
    /// Helicopter bomb drop at a map position.
    Bomb,
    /// Supply crate drop at a map position.
    Supply,
    /// Map-wide radar reveal.
    Radar,
    /// Electromagnetic pulse at a map position.
    Emp,
}

impl AbilityKind {
    /// Every ability, in a stable order usable as an array index.
    pub const ALL: [AbilityKind; 4] = [Self::Bomb, Self::Supply, Self::Radar, Self::Emp];

    /// Position of this ability in [`AbilityKind::ALL`].
    pub fn index(self) -> usize {
        match self {
            Self::Bomb => 0,
            Self::Supply => 1,
            Self::Radar => 2,
            Self::Emp => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bomb => "bomb",
            Self::Supply => "supply",
            Self::Radar => "radar",
            Self::Emp => "emp",
        }
    }
}

impl fmt::Display for AbilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GamePhase
// ---------------------------------------------------------------------------

/// The game's current phase, as last signalled by the game connection.
///
/// Abilities are only permitted while the game is [`Active`](Self::Active).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Pre-game menus.
    Lobby,
    /// A wave is being played.
    #[default]
    Active,
    /// Between waves, in the shop.
    Shopping,
    /// Paused by the player.
    Paused,
    /// The run has ended.
    GameOver,
}

impl GamePhase {
    /// Returns `true` if companion abilities may be used in this phase.
    pub fn allows_abilities(self) -> bool {
        matches!(self, Self::Active)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// `join`: attach to a session by its human-readable code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Join {
    pub code: String,
    pub role: Role,
}

/// `rejoin`: attach to a session by its reconnect token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rejoin {
    pub token: String,
    pub role: Role,
}

/// A position or direction. Drops use [0,1] map coordinates, chopper input
/// uses a [-1,1] direction; the validator enforces the right range per type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// `ping`: client timestamp echoed back in `pong`, plus the round trip
/// the client measured for its previous ping, if any.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ping {
    pub t: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtt: Option<f64>,
}

/// `bomb_impact` / `supply_impact`: where a drop landed and what it did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Impact {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kills: Option<u32>,
    /// Stamped by the relay on forwarded frames; never accepted inbound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_seq: Option<u64>,
}

/// `game_state`: the game changed phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateChange {
    pub state: GamePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave: Option<u32>,
    /// Stamped by the relay on forwarded frames; never accepted inbound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_seq: Option<u64>,
}

/// `new_wave`: a period boundary. Ability budgets reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewWave {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave: Option<u32>,
}

// ---------------------------------------------------------------------------
// ClientMessage: everything the relay accepts
// ---------------------------------------------------------------------------

/// A validated inbound message.
///
/// This is a closed set: the validator maps every accepted frame to exactly
/// one variant, and anything else is rejected before it reaches the router.
/// `Serialize` is derived so endpoint code and tests can produce frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    // -- Pairing (either role) --
    Join(Join),
    Rejoin(Rejoin),
    Ping(Ping),

    // -- Companion → game --
    HelicopterDrop(Point),
    SupplyDrop(Point),
    EmpDrop(Point),
    RadarPing,
    ChopperInput(Point),

    // -- Game → companion --
    MinimapFull(MinimapFull),
    MinimapDelta(MinimapDelta),
    BombImpact(Impact),
    SupplyImpact(Impact),
    GameState(StateChange),
    NewWave(NewWave),
}

impl ClientMessage {
    /// The wire `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Rejoin(_) => "rejoin",
            Self::Ping(_) => "ping",
            Self::HelicopterDrop(_) => "helicopter_drop",
            Self::SupplyDrop(_) => "supply_drop",
            Self::EmpDrop(_) => "emp_drop",
            Self::RadarPing => "radar_ping",
            Self::ChopperInput(_) => "chopper_input",
            Self::MinimapFull(_) => "minimap_full",
            Self::MinimapDelta(_) => "minimap_delta",
            Self::BombImpact(_) => "bomb_impact",
            Self::SupplyImpact(_) => "supply_impact",
            Self::GameState(_) => "game_state",
            Self::NewWave(_) => "new_wave",
        }
    }

    /// The ability this message consumes, if it is a capability request.
    pub fn ability(&self) -> Option<AbilityKind> {
        match self {
            Self::HelicopterDrop(_) => Some(AbilityKind::Bomb),
            Self::SupplyDrop(_) => Some(AbilityKind::Supply),
            Self::EmpDrop(_) => Some(AbilityKind::Emp),
            Self::RadarPing => Some(AbilityKind::Radar),
            _ => None,
        }
    }

    /// The role allowed to send this message, or `None` if either may.
    pub fn sender_role(&self) -> Option<Role> {
        match self {
            Self::Join(_) | Self::Rejoin(_) | Self::Ping(_) => None,
            Self::HelicopterDrop(_)
            | Self::SupplyDrop(_)
            | Self::EmpDrop(_)
            | Self::RadarPing
            | Self::ChopperInput(_) => Some(Role::Companion),
            Self::MinimapFull(_)
            | Self::MinimapDelta(_)
            | Self::BombImpact(_)
            | Self::SupplyImpact(_)
            | Self::GameState(_)
            | Self::NewWave(_) => Some(Role::Game),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerMessage: everything the relay sends
// ---------------------------------------------------------------------------

/// Reason codes carried by `error` frames.
///
/// Protocol failures all collapse to [`InvalidMessage`](Self::InvalidMessage);
/// session and policy failures get specific codes the controller UI maps to
/// a human message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    InvalidMessage,
    NotJoined,
    AlreadyJoined,
    NotPermitted,
    SessionNotFound,
    SessionExpired,
    NoPeer,
    InvalidState,
    WaveBudgetExhausted,
    CooldownActive,
    BurstLimit,
}

/// A message from the relay to a game or companion connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    // -- Pairing --
    Joined {
        code: String,
        token: String,
        role: Role,
    },
    GameConnected,
    CompanionConnected,
    GameDisconnected,
    CompanionDisconnected,

    // -- Commands delivered to the game --
    BombDrop { x: f64, y: f64 },
    SupplyDrop { x: f64, y: f64 },
    EmpDrop { x: f64, y: f64 },
    RadarPing,
    ChopperInput { x: f64, y: f64 },

    // -- Acknowledgements delivered to the companion --
    DropAck {
        ability: AbilityKind,
        x: f64,
        y: f64,
        remaining: u32,
    },
    RadarAck {
        ability: AbilityKind,
        remaining: u32,
    },

    // -- Game events forwarded to the companion --
    MinimapFull(MinimapFull),
    MinimapDelta(MinimapDelta),
    BombImpact(Impact),
    SupplyImpact(Impact),
    GameState(StateChange),
    NewWave(NewWave),

    // -- Liveness / errors --
    Pong { t: u64, server_time: u64 },
    Error {
        reason: ErrorReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ability: Option<AbilityKind>,
    },
}

impl ServerMessage {
    /// Builds an `error` frame without an ability.
    pub fn error(reason: ErrorReason) -> Self {
        Self::Error {
            reason,
            ability: None,
        }
    }

    /// The "peer connected" notice delivered to a connection of `role`.
    pub fn peer_connected(role: Role) -> Self {
        match role {
            Role::Game => Self::CompanionConnected,
            Role::Companion => Self::GameConnected,
        }
    }

    /// The "peer disconnected" notice delivered to a connection of `role`.
    pub fn peer_disconnected(role: Role) -> Self {
        match role {
            Role::Game => Self::CompanionDisconnected,
            Role::Companion => Self::GameDisconnected,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
