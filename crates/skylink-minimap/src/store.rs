//! Receiver-side minimap state.

use std::collections::BTreeMap;

use skylink_protocol::{
    dequantize, GroupDelta, MinimapDelta, MinimapFull, WireEntity, WirePoint, MINIMAP_VERSION,
};

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

/// One entity, in normalized `[0,1]` map coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entity {
    pub x: f64,
    pub y: f64,
    pub boss: bool,
}

impl From<&WireEntity> for Entity {
    fn from(wire: &WireEntity) -> Self {
        Self {
            x: dequantize(wire.x),
            y: dequantize(wire.y),
            boss: wire.boss,
        }
    }
}

/// What the receiver currently believes is on the map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinimapView {
    pub enemies: BTreeMap<String, Entity>,
    pub allies: BTreeMap<String, Entity>,
    pub players: BTreeMap<String, Entity>,
    pub chopper: Option<(f64, f64)>,
}

impl MinimapView {
    fn from_full(frame: &MinimapFull) -> Self {
        Self {
            enemies: collect(&frame.enemies),
            allies: collect(&frame.allies),
            players: collect(&frame.players),
            chopper: frame.chopper.map(point),
        }
    }

    fn apply_delta(&mut self, delta: &MinimapDelta) {
        merge(&mut self.enemies, &delta.enemies);
        merge(&mut self.allies, &delta.allies);
        merge(&mut self.players, &delta.players);
        if delta.chopper_removed {
            self.chopper = None;
        } else if let Some(p) = delta.chopper {
            self.chopper = Some(point(p));
        }
    }

    /// Total number of keyed entities across all groups.
    pub fn entity_count(&self) -> usize {
        self.enemies.len() + self.allies.len() + self.players.len()
    }
}

fn collect(entities: &[WireEntity]) -> BTreeMap<String, Entity> {
    entities
        .iter()
        .map(|e| (e.id.clone(), Entity::from(e)))
        .collect()
}

fn merge(group: &mut BTreeMap<String, Entity>, delta: &GroupDelta) {
    for id in &delta.removed {
        group.remove(id);
    }
    for entity in &delta.upserts {
        group.insert(entity.id.clone(), Entity::from(entity));
    }
}

fn point(p: WirePoint) -> (f64, f64) {
    (dequantize(p.x), dequantize(p.y))
}

// ---------------------------------------------------------------------------
// Sync state
// ---------------------------------------------------------------------------

/// Whether the receiver can accept deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No usable baseline. Deltas are discarded until a full snapshot.
    AwaitingFull,
    /// The view matches frame `last_seq`.
    Synced { last_seq: u64 },
}

/// Result of applying one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The frame was applied.
    ///
    /// `continuous` is `false` when a full snapshot did not advance past
    /// the previous sequence (the sender restarted or reordered). Anything
    /// interpolating between frames should reset.
    Applied { continuous: bool },
    /// The frame was ignored.
    Discarded(DiscardReason),
}

/// Why a frame was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The frame's protocol version is not ours.
    VersionMismatch { got: u8 },
    /// A delta arrived while awaiting a full snapshot.
    NotSynced,
    /// The delta was computed against a different frame.
    BaseMismatch { expected: u64, got: u64 },
    /// The delta skips or repeats a sequence number.
    SequenceGap { expected: u64, got: u64 },
}

/// Counters for how a stream has behaved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncMetrics {
    pub fulls_applied: u64,
    pub deltas_applied: u64,
    pub discarded: u64,
    /// Times a synced receiver fell back to awaiting a full.
    pub desyncs: u64,
    pub discontinuities: u64,
}

// ---------------------------------------------------------------------------
// MinimapStore
// ---------------------------------------------------------------------------

/// Applies a frame stream under sequence gating.
///
/// A delta is applied only when all of these hold:
/// - the store is synced
/// - `v` matches [`MINIMAP_VERSION`]
/// - `base_seq` equals the last applied sequence
/// - `seq` is exactly one more
///
/// Any failure drops the store to [`SyncState::AwaitingFull`]. The view is
/// left as it was, stale but intact, until the next full snapshot replaces it.
#[derive(Debug, Clone)]
pub struct MinimapStore {
    state: SyncState,
    view: MinimapView,
    /// Highest sequence ever applied, kept across desyncs to detect
    /// discontinuous full snapshots.
    high_water: Option<u64>,
    metrics: SyncMetrics,
}

impl MinimapStore {
    pub fn new() -> Self {
        Self {
            state: SyncState::AwaitingFull,
            view: MinimapView::default(),
            high_water: None,
            metrics: SyncMetrics::default(),
        }
    }

    /// Replaces the view with a full snapshot.
    pub fn apply_full(&mut self, frame: &MinimapFull) -> ApplyOutcome {
        if frame.v != MINIMAP_VERSION {
            tracing::debug!(got = frame.v, "minimap full with foreign version discarded");
            self.metrics.discarded += 1;
            return ApplyOutcome::Discarded(DiscardReason::VersionMismatch { got: frame.v });
        }

        let continuous = self.high_water.is_none_or(|prev| frame.seq > prev);
        if !continuous {
            tracing::debug!(seq = frame.seq, "minimap sequence restarted");
            self.metrics.discontinuities += 1;
        }

        self.view = MinimapView::from_full(frame);
        self.state = SyncState::Synced {
            last_seq: frame.seq,
        };
        self.high_water = Some(frame.seq);
        self.metrics.fulls_applied += 1;
        ApplyOutcome::Applied { continuous }
    }

    /// Applies a delta if it continues the current baseline.
    pub fn apply_delta(&mut self, delta: &MinimapDelta) -> ApplyOutcome {
        match self.check_delta(delta) {
            Ok(()) => {
                self.view.apply_delta(delta);
                self.state = SyncState::Synced {
                    last_seq: delta.seq,
                };
                self.high_water = Some(delta.seq);
                self.metrics.deltas_applied += 1;
                ApplyOutcome::Applied { continuous: true }
            }
            Err(reason) => {
                if matches!(self.state, SyncState::Synced { .. }) {
                    tracing::debug!(?reason, "minimap desynced, awaiting full snapshot");
                    self.metrics.desyncs += 1;
                }
                self.state = SyncState::AwaitingFull;
                self.metrics.discarded += 1;
                ApplyOutcome::Discarded(reason)
            }
        }
    }

    fn check_delta(&self, delta: &MinimapDelta) -> Result<(), DiscardReason> {
        let SyncState::Synced { last_seq } = self.state else {
            return Err(DiscardReason::NotSynced);
        };
        if delta.v != MINIMAP_VERSION {
            return Err(DiscardReason::VersionMismatch { got: delta.v });
        }
        if delta.base_seq != last_seq {
            return Err(DiscardReason::BaseMismatch {
                expected: last_seq,
                got: delta.base_seq,
            });
        }
        let expected = last_seq.wrapping_add(1);
        if delta.seq != expected {
            return Err(DiscardReason::SequenceGap {
                expected,
                got: delta.seq,
            });
        }
        Ok(())
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_synced(&self) -> bool {
        matches!(self.state, SyncState::Synced { .. })
    }

    /// The current view. Possibly stale while awaiting a full snapshot.
    pub fn view(&self) -> &MinimapView {
        &self.view
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }
}

impl Default for MinimapStore {
    fn default() -> Self {
        Self::new()
    }
}
