//! Ability governance: should this capability request be honored?
//!
//! Every companion ability is checked against an ordered list of rules.
//! The first rule that fails decides the rejection reason:
//!
//! ```text
//!   no_peer ─→ invalid_state ─→ wave_budget_exhausted ─→ cooldown_active ─→ burst_limit
//! ```
//!
//! Evaluation is split from mutation. [`evaluate`] reads a usage record and
//! never changes it; only [`commit`] does, and only after evaluation passed.
//! A rejected request therefore never costs budget, never restarts a
//! cooldown, and never counts toward a burst.

use std::collections::VecDeque;
use std::time::Duration;

use skylink_protocol::{AbilityKind, ErrorReason, GamePhase};

/// At most `max` uses inside any sliding `window`.
///
/// Unlike the per-period budget, burst history survives a period reset, so
/// rapid-fire resets cannot be used to spam an ability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstLimit {
    pub max: u32,
    pub window: Duration,
}

/// Limits for one ability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbilityPolicy {
    /// Uses allowed between two period resets.
    pub max_per_period: u32,
    /// Minimum time between two accepted uses.
    pub cooldown: Duration,
    pub burst: Option<BurstLimit>,
}

impl AbilityPolicy {
    pub const fn new(max_per_period: u32, cooldown: Duration) -> Self {
        Self {
            max_per_period,
            cooldown,
            burst: None,
        }
    }

    pub const fn with_burst(mut self, max: u32, window: Duration) -> Self {
        self.burst = Some(BurstLimit { max, window });
        self
    }
}

/// Policies for every ability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbilityPolicies {
    pub bomb: AbilityPolicy,
    pub supply: AbilityPolicy,
    pub radar: AbilityPolicy,
    pub emp: AbilityPolicy,
}

impl AbilityPolicies {
    pub fn get(&self, ability: AbilityKind) -> &AbilityPolicy {
        match ability {
            AbilityKind::Bomb => &self.bomb,
            AbilityKind::Supply => &self.supply,
            AbilityKind::Radar => &self.radar,
            AbilityKind::Emp => &self.emp,
        }
    }
}

impl Default for AbilityPolicies {
    fn default() -> Self {
        let burst = Duration::from_secs(10);
        Self {
            bomb: AbilityPolicy::new(2, Duration::from_secs(30)).with_burst(1, burst),
            supply: AbilityPolicy::new(1, Duration::from_secs(45)).with_burst(1, burst),
            radar: AbilityPolicy::new(3, Duration::from_secs(20)).with_burst(1, burst),
            emp: AbilityPolicy::new(1, Duration::from_secs(60)).with_burst(1, burst),
        }
    }
}

/// Per-session, per-ability usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbilityUsage {
    /// Accepted uses since the last period reset.
    pub used_this_period: u32,
    /// Clock reading (ms) of the last accepted use.
    pub last_used_at: Option<u64>,
    /// Timestamps of recent accepted uses, for the burst window.
    recent: VecDeque<u64>,
}

impl AbilityUsage {
    /// Starts a new period. Burst history is kept.
    pub fn reset_period(&mut self) {
        self.used_this_period = 0;
        self.last_used_at = None;
    }

    /// Accepted uses still inside `window` as of `now_ms`.
    pub fn uses_within(&self, window: Duration, now_ms: u64) -> usize {
        let window_ms = window.as_millis() as u64;
        self.recent
            .iter()
            .filter(|&&at| now_ms.saturating_sub(at) < window_ms)
            .count()
    }
}

/// Why a capability request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("no game connection is attached")]
    NoPeer,
    #[error("the game is not in a phase that allows abilities")]
    InvalidState,
    #[error("the per-wave budget is used up")]
    WaveBudgetExhausted,
    #[error("the ability is cooling down")]
    CooldownActive,
    #[error("too many uses in the burst window")]
    BurstLimit,
}

impl From<Rejection> for ErrorReason {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::NoPeer => ErrorReason::NoPeer,
            Rejection::InvalidState => ErrorReason::InvalidState,
            Rejection::WaveBudgetExhausted => ErrorReason::WaveBudgetExhausted,
            Rejection::CooldownActive => ErrorReason::CooldownActive,
            Rejection::BurstLimit => ErrorReason::BurstLimit,
        }
    }
}

/// Session facts the governor needs besides the usage record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gate {
    pub game_attached: bool,
    pub phase: GamePhase,
}

/// Checks a request without touching any state.
pub fn evaluate(
    policy: &AbilityPolicy,
    usage: &AbilityUsage,
    gate: Gate,
    now_ms: u64,
) -> Result<(), Rejection> {
    if !gate.game_attached {
        return Err(Rejection::NoPeer);
    }
    if !gate.phase.allows_abilities() {
        return Err(Rejection::InvalidState);
    }
    if usage.used_this_period >= policy.max_per_period {
        return Err(Rejection::WaveBudgetExhausted);
    }
    if let Some(last) = usage.last_used_at {
        let cooldown_ms = policy.cooldown.as_millis() as u64;
        if now_ms.saturating_sub(last) < cooldown_ms {
            return Err(Rejection::CooldownActive);
        }
    }
    if let Some(burst) = policy.burst {
        if usage.uses_within(burst.window, now_ms) >= burst.max as usize {
            return Err(Rejection::BurstLimit);
        }
    }
    Ok(())
}

/// Records an accepted use and returns the remaining period budget.
///
/// Callers must have run [`evaluate`] first.
pub fn commit(policy: &AbilityPolicy, usage: &mut AbilityUsage, now_ms: u64) -> u32 {
    usage.used_this_period += 1;
    usage.last_used_at = Some(now_ms);
    if let Some(burst) = policy.burst {
        let window_ms = burst.window.as_millis() as u64;
        usage.recent.retain(|&at| now_ms.saturating_sub(at) < window_ms);
        usage.recent.push_back(now_ms);
    }
    policy.max_per_period.saturating_sub(usage.used_this_period)
}

/// [`evaluate`] then [`commit`].
pub fn consume(
    policy: &AbilityPolicy,
    usage: &mut AbilityUsage,
    gate: Gate,
    now_ms: u64,
) -> Result<u32, Rejection> {
    evaluate(policy, usage, gate, now_ms)?;
    Ok(commit(policy, usage, now_ms))
}
