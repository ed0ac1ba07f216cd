//! Relay-wide counters, exposed on `/stats`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use skylink_session::RoundTripHistogram;

/// Lock-free counters updated from every connection task.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub(crate) connections_opened: AtomicU64,
    pub(crate) connections_active: AtomicU64,
    pub(crate) frames_received: AtomicU64,
    pub(crate) frames_rejected: AtomicU64,
    pub(crate) frames_rate_limited: AtomicU64,
    pub(crate) messages_sent: AtomicU64,
    pub(crate) messages_dropped: AtomicU64,
    pub(crate) abilities_accepted: AtomicU64,
    pub(crate) abilities_rejected: AtomicU64,
    pub(crate) sessions_created: AtomicU64,
    pub(crate) sessions_expired: AtomicU64,
    pub(crate) creations_throttled: AtomicU64,
}

/// A point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub connections_opened: u64,
    pub connections_active: u64,
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub frames_rate_limited: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub abilities_accepted: u64,
    pub abilities_rejected: u64,
    pub sessions_created: u64,
    pub sessions_expired: u64,
    pub creations_throttled: u64,
    /// Sessions currently held by the store.
    pub sessions_live: u64,
    /// Reported round trips across live sessions.
    pub round_trips: RoundTrips,
}

/// Serializable form of a [`RoundTripHistogram`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoundTrips {
    pub under_50ms: u64,
    pub under_100ms: u64,
    pub under_250ms: u64,
    pub under_500ms: u64,
    pub under_1000ms: u64,
    pub from_1000ms: u64,
}

impl From<RoundTripHistogram> for RoundTrips {
    fn from(h: RoundTripHistogram) -> Self {
        Self {
            under_50ms: h.under_50ms,
            under_100ms: h.under_100ms,
            under_250ms: h.under_250ms,
            under_500ms: h.under_500ms,
            under_1000ms: h.under_1000ms,
            from_1000ms: h.from_1000ms,
        }
    }
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl RelayStats {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, sessions_live: usize) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            connections_opened: load(&self.connections_opened),
            connections_active: load(&self.connections_active),
            frames_received: load(&self.frames_received),
            frames_rejected: load(&self.frames_rejected),
            frames_rate_limited: load(&self.frames_rate_limited),
            messages_sent: load(&self.messages_sent),
            messages_dropped: load(&self.messages_dropped),
            abilities_accepted: load(&self.abilities_accepted),
            abilities_rejected: load(&self.abilities_rejected),
            sessions_created: load(&self.sessions_created),
            sessions_expired: load(&self.sessions_expired),
            creations_throttled: load(&self.creations_throttled),
            sessions_live: sessions_live as u64,
            round_trips: RoundTrips::default(),
        }
    }
}
