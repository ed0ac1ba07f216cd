//! Session types: the data that makes up one pairing.
//!
//! A session is the relay's record of one live activity. It tracks:
//! - HOW endpoints find it (a short join code and a secret reconnect token)
//! - WHO is attached (at most one game and one companion connection)
//! - WHAT the companion has spent (per-ability usage for the current wave)
//! - WHEN it dies (a fixed expiry on the store's clock)

use std::net::IpAddr;
use std::time::Duration;

use skylink_protocol::{AbilityKind, GamePhase, Role};

use crate::governor::{AbilityPolicies, AbilityUsage};
use crate::{PeerLink, RoundTripHistogram};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lifetime of a session, counted from creation.
    ///
    /// Default: 2 hours.
    pub ttl: Duration,

    /// How many live sessions one originating address may own at once.
    ///
    /// Default: 4.
    pub max_sessions_per_origin: usize,

    /// Budgets and cooldowns for each ability.
    pub abilities: AbilityPolicies,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(2 * 60 * 60),
            max_sessions_per_origin: 4,
            abilities: AbilityPolicies::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One pairing between a game and a companion.
///
/// Sessions are only handed out by reference from the
/// [`SessionStore`](crate::SessionStore), which is the only code that
/// mutates them.
#[derive(Debug)]
pub struct Session {
    /// Six-character join code shown on the game screen.
    pub code: String,

    /// Twelve-character secret for `rejoin`. Never logged.
    pub reconnect_token: String,

    pub game: Option<PeerLink>,
    pub companion: Option<PeerLink>,

    /// Clock readings in milliseconds. The session is live while
    /// `now < expires_at`.
    pub created_at: u64,
    pub expires_at: u64,

    /// Usage per ability, indexed by [`AbilityKind::index`].
    pub usage: [AbilityUsage; 4],

    /// Counter stamped onto frames forwarded to the companion.
    pub relay_seq: u64,

    pub phase: GamePhase,

    /// Last wave number the game reported.
    pub wave: u32,

    /// Address that created the session, if known.
    pub origin: Option<IpAddr>,

    /// Round trips reported by either endpoint.
    pub round_trips: RoundTripHistogram,
}

impl Session {
    pub(crate) fn new(
        code: String,
        reconnect_token: String,
        origin: Option<IpAddr>,
        now_ms: u64,
        ttl: Duration,
    ) -> Self {
        Self {
            code,
            reconnect_token,
            game: None,
            companion: None,
            created_at: now_ms,
            expires_at: now_ms.saturating_add(ttl.as_millis() as u64),
            usage: Default::default(),
            relay_seq: 0,
            phase: GamePhase::default(),
            wave: 0,
            origin,
            round_trips: RoundTripHistogram::default(),
        }
    }

    /// The connection attached in `role`'s slot.
    pub fn link(&self, role: Role) -> Option<&PeerLink> {
        match role {
            Role::Game => self.game.as_ref(),
            Role::Companion => self.companion.as_ref(),
        }
    }

    pub(crate) fn slot_mut(&mut self, role: Role) -> &mut Option<PeerLink> {
        match role {
            Role::Game => &mut self.game,
            Role::Companion => &mut self.companion,
        }
    }

    pub fn is_attached(&self, role: Role) -> bool {
        self.link(role).is_some()
    }

    /// Returns `true` once neither role is attached.
    pub fn is_vacant(&self) -> bool {
        self.game.is_none() && self.companion.is_none()
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    pub fn usage(&self, ability: AbilityKind) -> &AbilityUsage {
        &self.usage[ability.index()]
    }

    pub(crate) fn reset_period(&mut self) {
        for usage in &mut self.usage {
            usage.reset_period();
        }
    }

    /// Every attached link, game first.
    pub fn links(&self) -> impl Iterator<Item = &PeerLink> {
        self.game.iter().chain(self.companion.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylink_transport::ConnectionId;

    fn session() -> Session {
        Session::new("ABCDEF".into(), "tok".into(), None, 1_000, Duration::from_secs(10))
    }

    #[test]
    fn test_new_session_is_vacant_and_active() {
        let s = session();
        assert!(s.is_vacant());
        assert_eq!(s.phase, GamePhase::Active);
        assert_eq!(s.expires_at, 11_000);
        assert_eq!(s.usage(AbilityKind::Emp).used_this_period, 0);
    }

    #[test]
    fn test_is_expired_at_boundary() {
        let s = session();
        assert!(!s.is_expired(10_999));
        assert!(s.is_expired(11_000));
    }

    #[test]
    fn test_slot_mut_attaches_role() {
        let mut s = session();
        let (link, _rx, _) = PeerLink::channel(ConnectionId::new(3), 4);
        *s.slot_mut(Role::Companion) = Some(link);
        assert!(s.is_attached(Role::Companion));
        assert!(!s.is_attached(Role::Game));
        assert_eq!(s.links().count(), 1);
    }
}
