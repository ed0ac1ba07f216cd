//! Sliding-window abuse limits.
//!
//! Two users: each connection owns a [`SlidingWindow`] for its inbound
//! frame rate, and the HTTP surface shares one [`OriginThrottle`] for
//! session-creation attempts per IP address. Both take the current time as
//! an argument so they follow whatever clock the caller uses.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::Duration;

/// At most `max` events per rolling `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max: usize,
    pub window: Duration,
}

impl RateLimit {
    pub const fn new(max: usize, window: Duration) -> Self {
        Self { max, window }
    }
}

/// A timestamp-queue limiter. Refused events are not recorded.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    limit: RateLimit,
    hits: VecDeque<u64>,
}

impl SlidingWindow {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            hits: VecDeque::with_capacity(limit.max.min(64)),
        }
    }

    /// Records an event at `now_ms` if the window has room.
    pub fn try_acquire(&mut self, now_ms: u64) -> bool {
        self.prune(now_ms);
        if self.hits.len() >= self.limit.max {
            return false;
        }
        self.hits.push_back(now_ms);
        true
    }

    /// Returns `true` if no event is left inside the window.
    pub fn is_idle(&mut self, now_ms: u64) -> bool {
        self.prune(now_ms);
        self.hits.is_empty()
    }

    fn prune(&mut self, now_ms: u64) {
        let window_ms = self.limit.window.as_millis() as u64;
        while let Some(&oldest) = self.hits.front() {
            if now_ms.saturating_sub(oldest) < window_ms {
                break;
            }
            self.hits.pop_front();
        }
    }
}

/// One [`SlidingWindow`] per originating address.
#[derive(Debug)]
pub struct OriginThrottle {
    limit: RateLimit,
    windows: HashMap<IpAddr, SlidingWindow>,
}

impl OriginThrottle {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            windows: HashMap::new(),
        }
    }

    /// Counts an attempt from `origin`. Returns `false` when throttled.
    pub fn try_acquire(&mut self, origin: IpAddr, now_ms: u64) -> bool {
        let limit = self.limit;
        let allowed = self
            .windows
            .entry(origin)
            .or_insert_with(|| SlidingWindow::new(limit))
            .try_acquire(now_ms);
        if !allowed {
            tracing::warn!(%origin, "session creation throttled");
        }
        allowed
    }

    /// Forgets addresses with no attempts left inside the window.
    pub fn prune_idle(&mut self, now_ms: u64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_idle(now_ms));
        before - self.windows.len()
    }

    /// Number of addresses currently tracked.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
