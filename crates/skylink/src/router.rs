//! Connection pairing and message routing.
//!
//! The router is the part of the relay that decides, for one validated
//! inbound message, what changes in the store and who hears about it.
//! It runs with the store locked and never touches a socket: it returns a
//! list of [`Delivery`]s that the handler sends once the lock is released.
//!
//! Routing rules in brief:
//!
//! | From        | Message                       | Effect                              |
//! |-------------|-------------------------------|-------------------------------------|
//! | anyone      | `join` / `rejoin`             | attach role, notify both sides      |
//! | anyone      | `ping`                        | `pong` back                         |
//! | companion   | drops / `radar_ping`          | governor, command to game, ack      |
//! | companion   | `chopper_input`               | forwarded to game, unmetered        |
//! | game        | minimap / impacts / state     | forwarded to companion, stamped     |
//! | game        | `new_wave`                    | reset budgets, notify companion     |

use std::time::{SystemTime, UNIX_EPOCH};

use skylink_protocol::{
    AbilityKind, ClientMessage, ErrorReason, Point, Role, ServerMessage,
};
use skylink_session::{
    AbilityOutcome, Clock, Detachment, PeerLink, SessionError, SessionStore,
};
use skylink_transport::ConnectionId;

use crate::stats::{bump, RelayStats};

/// A message bound for one connection.
pub(crate) type Delivery = (PeerLink, ServerMessage);

/// The session slot a connection occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Joined {
    pub(crate) code: String,
    pub(crate) role: Role,
}

/// Per-connection routing state.
#[derive(Debug)]
pub(crate) struct ConnContext {
    pub(crate) conn_id: ConnectionId,
    pub(crate) joined: Option<Joined>,
}

impl ConnContext {
    pub(crate) fn new(conn_id: ConnectionId) -> Self {
        Self {
            conn_id,
            joined: None,
        }
    }

    pub(crate) fn role(&self) -> Option<Role> {
        self.joined.as_ref().map(|j| j.role)
    }
}

enum Lookup {
    Code(String),
    Token(String),
}

/// Routes one validated message from the connection behind `me`.
pub(crate) fn route<C: Clock>(
    store: &mut SessionStore<C>,
    ctx: &mut ConnContext,
    me: &PeerLink,
    msg: ClientMessage,
    stats: &RelayStats,
) -> Vec<Delivery> {
    match msg {
        ClientMessage::Join(join) => attach(store, ctx, me, Lookup::Code(join.code), join.role),
        ClientMessage::Rejoin(rejoin) => {
            attach(store, ctx, me, Lookup::Token(rejoin.token), rejoin.role)
        }
        ClientMessage::Ping(ping) => {
            if let (Some(rtt), Some(joined)) = (ping.rtt, &ctx.joined) {
                if let Err(e) = store.record_round_trip(&joined.code, rtt) {
                    tracing::debug!(conn_id = %ctx.conn_id, error = %e, "round trip not recorded");
                }
            }
            vec![(
                me.clone(),
                ServerMessage::Pong {
                    t: ping.t,
                    server_time: wall_clock_ms(),
                },
            )]
        }
        msg => {
            let joined = match current_slot(store, ctx) {
                Ok(joined) => joined,
                Err(reason) => return vec![(me.clone(), ServerMessage::error(reason))],
            };
            if msg.sender_role() != Some(joined.role) {
                tracing::debug!(conn_id = %ctx.conn_id, kind = msg.kind(), role = %joined.role, "message not permitted for role");
                return vec![(me.clone(), ServerMessage::error(ErrorReason::NotPermitted))];
            }
            match relay(store, &joined.code, me, msg, stats) {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    ctx.joined = None;
                    vec![(me.clone(), ServerMessage::error(e.reason()))]
                }
            }
        }
    }
}

/// Detaches the connection's role when it goes away. The remaining peer,
/// if any, is told; it is not closed.
pub(crate) fn leave<C: Clock>(store: &mut SessionStore<C>, ctx: &mut ConnContext) -> Vec<Delivery> {
    let Some(joined) = ctx.joined.take() else {
        return Vec::new();
    };
    match store.detach_role(&joined.code, joined.role, ctx.conn_id) {
        Detachment::Detached {
            peer: Some(peer), ..
        } => vec![(peer, ServerMessage::peer_disconnected(joined.role.peer()))],
        _ => Vec::new(),
    }
}

fn attach<C: Clock>(
    store: &mut SessionStore<C>,
    ctx: &mut ConnContext,
    me: &PeerLink,
    lookup: Lookup,
    role: Role,
) -> Vec<Delivery> {
    // A connection whose slot was taken over, or whose session is gone,
    // may join again.
    if ctx.joined.is_some() && current_slot(store, ctx).is_ok() {
        return vec![(me.clone(), ServerMessage::error(ErrorReason::AlreadyJoined))];
    }

    let found = match &lookup {
        Lookup::Code(code) => store.find_by_code(code),
        Lookup::Token(token) => store.find_by_token(token),
    };
    let code = match found {
        Ok(session) => session.code.clone(),
        Err(e) => {
            tracing::debug!(conn_id = %ctx.conn_id, error = %e, "join refused");
            return vec![(me.clone(), ServerMessage::error(e.reason()))];
        }
    };
    let attachment = match store.attach_role(&code, role, me.clone()) {
        Ok(attachment) => attachment,
        Err(e) => return vec![(me.clone(), ServerMessage::error(e.reason()))],
    };
    if let Some(displaced) = &attachment.displaced {
        tracing::info!(%code, %role, displaced = %displaced.id(), "role taken over by new connection");
    }

    ctx.joined = Some(Joined {
        code: attachment.code.clone(),
        role,
    });

    let mut out = vec![(
        me.clone(),
        ServerMessage::Joined {
            code: attachment.code,
            token: attachment.token,
            role,
        },
    )];
    if let Some(peer) = attachment.peer {
        out.push((me.clone(), ServerMessage::peer_connected(role)));
        out.push((peer, ServerMessage::peer_connected(role.peer())));
    }
    out
}

/// Confirms the connection still holds the slot it joined. A connection
/// whose slot was taken over, or whose session is gone, is unjoined.
fn current_slot<C: Clock>(
    store: &mut SessionStore<C>,
    ctx: &mut ConnContext,
) -> Result<Joined, ErrorReason> {
    let Some(joined) = ctx.joined.clone() else {
        return Err(ErrorReason::NotJoined);
    };
    match store.link(&joined.code, joined.role) {
        Ok(Some(link)) if link.id() == ctx.conn_id => Ok(joined),
        Ok(_) => {
            ctx.joined = None;
            Err(ErrorReason::NotJoined)
        }
        Err(e) => {
            ctx.joined = None;
            Err(e.reason())
        }
    }
}

fn relay<C: Clock>(
    store: &mut SessionStore<C>,
    code: &str,
    me: &PeerLink,
    msg: ClientMessage,
    stats: &RelayStats,
) -> Result<Vec<Delivery>, SessionError> {
    let deliveries = match msg {
        // -- Companion → game --
        ClientMessage::HelicopterDrop(p) => {
            let command = ServerMessage::BombDrop { x: p.x, y: p.y };
            use_ability(store, code, me, AbilityKind::Bomb, command, Some(p), stats)?
        }
        ClientMessage::SupplyDrop(p) => {
            let command = ServerMessage::SupplyDrop { x: p.x, y: p.y };
            use_ability(store, code, me, AbilityKind::Supply, command, Some(p), stats)?
        }
        ClientMessage::EmpDrop(p) => {
            let command = ServerMessage::EmpDrop { x: p.x, y: p.y };
            use_ability(store, code, me, AbilityKind::Emp, command, Some(p), stats)?
        }
        ClientMessage::RadarPing => {
            use_ability(store, code, me, AbilityKind::Radar, ServerMessage::RadarPing, None, stats)?
        }
        ClientMessage::ChopperInput(p) => store
            .link(code, Role::Game)?
            .map(|game| (game, ServerMessage::ChopperInput { x: p.x, y: p.y }))
            .into_iter()
            .collect(),

        // -- Game → companion --
        ClientMessage::MinimapFull(mut frame) => stamped(store, code, |seq| {
            frame.relay_seq = Some(seq);
            ServerMessage::MinimapFull(frame)
        })?,
        ClientMessage::MinimapDelta(mut frame) => stamped(store, code, |seq| {
            frame.relay_seq = Some(seq);
            ServerMessage::MinimapDelta(frame)
        })?,
        ClientMessage::BombImpact(mut impact) => stamped(store, code, |seq| {
            impact.relay_seq = Some(seq);
            ServerMessage::BombImpact(impact)
        })?,
        ClientMessage::SupplyImpact(mut impact) => stamped(store, code, |seq| {
            impact.relay_seq = Some(seq);
            ServerMessage::SupplyImpact(impact)
        })?,
        ClientMessage::GameState(mut change) => {
            store.set_phase(code, change.state, change.wave)?;
            stamped(store, code, |seq| {
                change.relay_seq = Some(seq);
                ServerMessage::GameState(change)
            })?
        }
        ClientMessage::NewWave(wave) => store
            .reset_period_counters(code, wave.wave)?
            .map(|companion| (companion, ServerMessage::NewWave(wave)))
            .into_iter()
            .collect(),

        // Handled in `route`.
        ClientMessage::Join(_) | ClientMessage::Rejoin(_) | ClientMessage::Ping(_) => Vec::new(),
    };
    Ok(deliveries)
}

/// Runs an ability through the governor. On acceptance `command` goes to
/// the game and the companion gets an ack; `target` is echoed in the ack
/// for positional abilities.
fn use_ability<C: Clock>(
    store: &mut SessionStore<C>,
    code: &str,
    me: &PeerLink,
    ability: AbilityKind,
    command: ServerMessage,
    target: Option<Point>,
    stats: &RelayStats,
) -> Result<Vec<Delivery>, SessionError> {
    match store.consume_ability(code, ability)? {
        AbilityOutcome::Accepted { remaining, game } => {
            bump(&stats.abilities_accepted);
            let ack = match target {
                Some(Point { x, y }) => ServerMessage::DropAck {
                    ability,
                    x,
                    y,
                    remaining,
                },
                None => ServerMessage::RadarAck { ability, remaining },
            };
            Ok(vec![(game, command), (me.clone(), ack)])
        }
        AbilityOutcome::Rejected(rejection) => {
            bump(&stats.abilities_rejected);
            Ok(vec![(
                me.clone(),
                ServerMessage::Error {
                    reason: rejection.into(),
                    ability: Some(ability),
                },
            )])
        }
    }
}

/// Builds a companion-bound frame with the next `relay_seq`. Nothing is
/// produced, and the counter does not move, without a companion.
fn stamped<C: Clock>(
    store: &mut SessionStore<C>,
    code: &str,
    build: impl FnOnce(u64) -> ServerMessage,
) -> Result<Vec<Delivery>, SessionError> {
    Ok(store
        .next_relay_seq(code)?
        .map(|(seq, companion)| (companion, build(seq)))
        .into_iter()
        .collect())
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =========================================================================
// Tests
// =========================================================================
