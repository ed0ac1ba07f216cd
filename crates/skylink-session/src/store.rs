//! The session store: the single in-memory authority for every pairing.
//!
//! It's responsible for:
//! - Creating sessions with unique codes and reconnect tokens
//! - Finding sessions by code or token, telling "never existed" apart from
//!   "expired"
//! - Attaching and detaching the game and companion roles
//! - Running companion abilities through the [`governor`](crate::governor)
//! - Expiring sessions whose TTL has elapsed
//!
//! # Concurrency note
//!
//! `SessionStore` is NOT thread-safe by itself. The server wraps it in a
//! single `tokio::sync::Mutex` shared by every connection handler and the
//! sweeper. Nothing here awaits or touches a socket: operations that need
//! to reach a connection hand back [`PeerLink`]s, and the caller sends
//! through them after releasing the lock.

use std::collections::HashMap;
use std::net::IpAddr;

use rand::Rng;
use skylink_protocol::{AbilityKind, GamePhase, Role};
use skylink_transport::ConnectionId;

use crate::governor::{self, Gate, Rejection};
use crate::{Clock, PeerLink, RoundTripHistogram, Session, SessionConfig, SessionError, SystemClock};

/// Characters used in join codes: uppercase alphanumerics without the
/// easily confused `I`, `O`, `0` and `1`.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_LEN: usize = 12;

/// Result of [`SessionStore::attach_role`].
#[derive(Debug)]
pub struct Attachment {
    /// Canonical code of the session.
    pub code: String,
    pub token: String,
    /// The connection that previously held the slot, if any. It is not
    /// closed; its own liveness check will retire it.
    pub displaced: Option<PeerLink>,
    /// The connection in the other role's slot, if any.
    pub peer: Option<PeerLink>,
}

/// Result of [`SessionStore::detach_role`].
#[derive(Debug)]
pub enum Detachment {
    /// The slot was cleared.
    Detached {
        /// The connection still attached in the other role, if any.
        peer: Option<PeerLink>,
        /// `true` if the session was deleted because both slots are empty.
        removed: bool,
    },
    /// The slot is held by a different connection; nothing changed.
    Stale,
    /// The session no longer exists.
    Missing,
}

/// Result of [`SessionStore::consume_ability`].
#[derive(Debug)]
pub enum AbilityOutcome {
    /// The use was recorded. The command should go to `game`.
    Accepted { remaining: u32, game: PeerLink },
    /// The use was refused and nothing changed.
    Rejected(Rejection),
}

/// Holds every live session.
///
/// ## Lifecycle
///
/// ```text
/// create() ──→ attach_role(game) ──→ attach_role(companion) ──→ ...
///                                                               │
///          detach_role() × 2 ──→ [removed]                      │
///          sweep_expired() / expired lookup ──→ [removed] ←─────┘
/// ```
pub struct SessionStore<C: Clock = SystemClock> {
    /// All live sessions, keyed by canonical (uppercase) code.
    sessions: HashMap<String, Session>,

    /// Index from reconnect token to code. Kept in sync with `sessions`:
    /// every removal goes through [`SessionStore::remove`].
    tokens: HashMap<String, String>,

    config: SessionConfig,
    clock: C,
}

impl SessionStore<SystemClock> {
    /// Creates an empty store on the system clock.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_clock(config, SystemClock::new())
    }
}

impl<C: Clock> SessionStore<C> {
    /// Creates an empty store on an injected clock.
    pub fn with_clock(config: SessionConfig, clock: C) -> Self {
        Self {
            sessions: HashMap::new(),
            tokens: HashMap::new(),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The store's current clock reading.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Creates a new, unattached session.
    ///
    /// Code and token are regenerated until they collide with nothing live.
    ///
    /// # Errors
    /// Returns [`SessionError::TooManySessions`] if `origin` already owns
    /// `max_sessions_per_origin` live sessions.
    pub fn create(&mut self, origin: Option<IpAddr>) -> Result<&Session, SessionError> {
        if let Some(ip) = origin {
            let owned = self.sessions_owned_by(ip);
            if owned >= self.config.max_sessions_per_origin {
                return Err(SessionError::TooManySessions { origin: ip, owned });
            }
        }

        let code = loop {
            let candidate = random_string(CODE_ALPHABET, CODE_LEN);
            if !self.sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let token = loop {
            let candidate = random_string(TOKEN_ALPHABET, TOKEN_LEN);
            if !self.tokens.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Session::new(
            code.clone(),
            token.clone(),
            origin,
            self.clock.now_ms(),
            self.config.ttl,
        );
        self.tokens.insert(token, code.clone());
        tracing::info!(%code, "session created");
        Ok(self.sessions.entry(code).or_insert(session))
    }

    /// Looks up a live session by join code (case-insensitive).
    ///
    /// # Errors
    /// [`SessionError::NotFound`] or [`SessionError::Expired`]. An expired
    /// session is evicted by the lookup.
    pub fn find_by_code(&mut self, code: &str) -> Result<&Session, SessionError> {
        let code = self.live_code(code)?;
        self.sessions.get(&code).ok_or(SessionError::NotFound)
    }

    /// Looks up a live session by reconnect token (case-sensitive).
    ///
    /// # Errors
    /// Same as [`find_by_code`](Self::find_by_code).
    pub fn find_by_token(&mut self, token: &str) -> Result<&Session, SessionError> {
        let code = self
            .tokens
            .get(token)
            .cloned()
            .ok_or(SessionError::NotFound)?;
        self.find_by_code(&code)
    }

    /// Puts `link` in `role`'s slot.
    ///
    /// Any previous occupant is replaced but not closed. Attaching the
    /// companion starts a fresh period: ability counters and `relay_seq`
    /// are reset.
    pub fn attach_role(
        &mut self,
        code: &str,
        role: Role,
        link: PeerLink,
    ) -> Result<Attachment, SessionError> {
        let session = self.live_mut(code)?;
        let conn_id = link.id();
        let displaced = session.slot_mut(role).replace(link);
        if role == Role::Companion {
            session.reset_period();
            session.relay_seq = 0;
        }
        tracing::info!(code = %session.code, %role, %conn_id, "role attached");
        Ok(Attachment {
            code: session.code.clone(),
            token: session.reconnect_token.clone(),
            displaced,
            peer: session.link(role.peer()).cloned(),
        })
    }

    /// Clears `role`'s slot if `conn_id` still holds it.
    ///
    /// Deletes the session once both slots are empty.
    pub fn detach_role(&mut self, code: &str, role: Role, conn_id: ConnectionId) -> Detachment {
        let Some(session) = self.sessions.get_mut(code) else {
            return Detachment::Missing;
        };
        if session.link(role).map(PeerLink::id) != Some(conn_id) {
            return Detachment::Stale;
        }
        *session.slot_mut(role) = None;
        tracing::info!(%code, %role, %conn_id, "role detached");

        let peer = session.link(role.peer()).cloned();
        let removed = session.is_vacant();
        if removed {
            self.remove(code);
            tracing::info!(%code, "session closed (both roles detached)");
        }
        Detachment::Detached { peer, removed }
    }

    /// Runs a companion ability through the governor.
    ///
    /// Usage is only mutated when every check passes.
    pub fn consume_ability(
        &mut self,
        code: &str,
        ability: AbilityKind,
    ) -> Result<AbilityOutcome, SessionError> {
        let now = self.clock.now_ms();
        let policy = *self.config.abilities.get(ability);
        let session = self.live_mut(code)?;
        let gate = Gate {
            game_attached: session.game.is_some(),
            phase: session.phase,
        };
        let usage = &mut session.usage[ability.index()];
        match governor::consume(&policy, usage, gate, now) {
            Ok(remaining) => {
                let Some(game) = session.game.clone() else {
                    return Ok(AbilityOutcome::Rejected(Rejection::NoPeer));
                };
                tracing::debug!(%code, %ability, remaining, "ability accepted");
                Ok(AbilityOutcome::Accepted { remaining, game })
            }
            Err(rejection) => {
                tracing::debug!(%code, %ability, %rejection, "ability rejected");
                Ok(AbilityOutcome::Rejected(rejection))
            }
        }
    }

    /// Starts a new period. Returns the companion link so the caller can
    /// notify it.
    pub fn reset_period_counters(
        &mut self,
        code: &str,
        wave: Option<u32>,
    ) -> Result<Option<PeerLink>, SessionError> {
        let session = self.live_mut(code)?;
        session.reset_period();
        if let Some(wave) = wave {
            session.wave = wave;
        }
        tracing::debug!(code = %session.code, wave = session.wave, "period reset");
        Ok(session.companion.clone())
    }

    /// Records a phase change reported by the game.
    pub fn set_phase(
        &mut self,
        code: &str,
        phase: GamePhase,
        wave: Option<u32>,
    ) -> Result<(), SessionError> {
        let session = self.live_mut(code)?;
        session.phase = phase;
        if let Some(wave) = wave {
            session.wave = wave;
        }
        Ok(())
    }

    /// Stamps a frame bound for the companion.
    ///
    /// Returns the new `relay_seq` and the companion link, or `None` when no
    /// companion is attached. The counter only advances for frames that have
    /// somewhere to go.
    pub fn next_relay_seq(&mut self, code: &str) -> Result<Option<(u64, PeerLink)>, SessionError> {
        let session = self.live_mut(code)?;
        let Some(companion) = session.companion.clone() else {
            return Ok(None);
        };
        session.relay_seq += 1;
        Ok(Some((session.relay_seq, companion)))
    }

    /// Adds a reported round trip to the session's histogram.
    ///
    /// Returns the updated histogram, or `None` if the sample was negative
    /// or not finite.
    pub fn record_round_trip(
        &mut self,
        code: &str,
        ms: f64,
    ) -> Result<Option<RoundTripHistogram>, SessionError> {
        let session = self.live_mut(code)?;
        if !session.round_trips.record(ms) {
            tracing::debug!(%code, ms, "round trip sample refused");
            return Ok(None);
        }
        Ok(Some(session.round_trips))
    }

    /// Histograms of every live session added together.
    pub fn round_trip_totals(&self) -> RoundTripHistogram {
        let now = self.clock.now_ms();
        self.sessions
            .values()
            .filter(|s| !s.is_expired(now))
            .fold(RoundTripHistogram::default(), |mut acc, s| {
                acc.merge(&s.round_trips);
                acc
            })
    }

    /// The link attached in `role`'s slot, if any.
    pub fn link(&mut self, code: &str, role: Role) -> Result<Option<PeerLink>, SessionError> {
        let session = self.live_mut(code)?;
        Ok(session.link(role).cloned())
    }

    /// Evicts every expired session.
    ///
    /// `on_evict` runs before each removal so the caller can terminate any
    /// sockets still attached. Returns the number evicted.
    pub fn sweep_expired(&mut self, mut on_evict: impl FnMut(&Session)) -> usize {
        let now = self.clock.now_ms();
        let expired: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.code.clone())
            .collect();

        for code in &expired {
            if let Some(session) = self.remove(code) {
                on_evict(&session);
                tracing::info!(%code, "session expired");
            }
        }
        expired.len()
    }

    /// Live sessions created by `origin`.
    pub fn sessions_owned_by(&self, origin: IpAddr) -> usize {
        let now = self.clock.now_ms();
        self.sessions
            .values()
            .filter(|s| s.origin == Some(origin) && !s.is_expired(now))
            .count()
    }

    /// Number of sessions held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Normalizes `code` and checks it names a live session, evicting it if
    /// it has expired.
    fn live_code(&mut self, code: &str) -> Result<String, SessionError> {
        let code = code.to_ascii_uppercase();
        let now = self.clock.now_ms();
        let expired = match self.sessions.get(&code) {
            None => return Err(SessionError::NotFound),
            Some(session) => session.is_expired(now),
        };
        if expired {
            if let Some(session) = self.remove(&code) {
                for link in session.links() {
                    link.close();
                }
            }
            tracing::info!(%code, "session expired (evicted on lookup)");
            return Err(SessionError::Expired);
        }
        Ok(code)
    }

    fn live_mut(&mut self, code: &str) -> Result<&mut Session, SessionError> {
        let code = self.live_code(code)?;
        self.sessions.get_mut(&code).ok_or(SessionError::NotFound)
    }

    /// Removes a session from both indices.
    fn remove(&mut self, code: &str) -> Option<Session> {
        let session = self.sessions.remove(code)?;
        self.tokens.remove(&session.reconnect_token);
        Some(session)
    }
}

fn random_string(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from(alphabet[rng.random_range(0..alphabet.len())]))
        .collect()
}

// =========================================================================
// Tests
// =========================================================================
