//! Sender-side frame production.

use std::collections::BTreeMap;

use skylink_protocol::{
    quantize, GroupDelta, MinimapDelta, MinimapFull, WireEntity, WirePoint, MINIMAP_VERSION,
};

/// An entity as the game sees it, in normalized `[0,1]` coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntity {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub boss: bool,
}

impl SnapshotEntity {
    pub fn new(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            boss: false,
        }
    }

    pub fn boss(mut self) -> Self {
        self.boss = true;
        self
    }
}

/// Everything on the map at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub enemies: Vec<SnapshotEntity>,
    pub allies: Vec<SnapshotEntity>,
    pub players: Vec<SnapshotEntity>,
    pub chopper: Option<(f64, f64)>,
}

/// A frame ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Full(MinimapFull),
    Delta(MinimapDelta),
}

impl Frame {
    pub fn seq(&self) -> u64 {
        match self {
            Self::Full(f) => f.seq,
            Self::Delta(d) => d.seq,
        }
    }
}

type Group = BTreeMap<String, WireEntity>;

/// The last frame sent, quantized. Deltas are computed against this.
#[derive(Debug, Clone, Default)]
struct Baseline {
    enemies: Group,
    allies: Group,
    players: Group,
    chopper: Option<WirePoint>,
}

impl Baseline {
    fn quantize(snapshot: &Snapshot) -> Self {
        Self {
            enemies: quantize_group(&snapshot.enemies),
            allies: quantize_group(&snapshot.allies),
            players: quantize_group(&snapshot.players),
            chopper: snapshot.chopper.map(|(x, y)| WirePoint {
                x: quantize(x),
                y: quantize(y),
            }),
        }
    }
}

fn quantize_group(entities: &[SnapshotEntity]) -> Group {
    entities
        .iter()
        .map(|e| {
            let wire = WireEntity {
                id: e.id.clone(),
                x: quantize(e.x),
                y: quantize(e.y),
                boss: e.boss,
            };
            (e.id.clone(), wire)
        })
        .collect()
}

/// Upserts for new or moved entities, removals for vanished ones.
/// Entities whose quantized position and flags are unchanged are omitted.
fn diff_group(prev: &Group, next: &Group) -> GroupDelta {
    let upserts = next
        .iter()
        .filter(|(id, entity)| prev.get(*id) != Some(*entity))
        .map(|(_, entity)| entity.clone())
        .collect();
    let removed = prev
        .keys()
        .filter(|id| !next.contains_key(*id))
        .cloned()
        .collect();
    GroupDelta { upserts, removed }
}

/// Turns successive snapshots into a frame stream.
///
/// The first frame is always full, then one full every `full_every` frames
/// with deltas in between. A full can also be requested explicitly, for
/// example when a new receiver appears.
#[derive(Debug, Clone)]
pub struct DeltaEncoder {
    full_every: u64,
    seq: u64,
    since_full: u64,
    baseline: Option<Baseline>,
}

impl DeltaEncoder {
    /// Default interval between full snapshots, in frames.
    pub const DEFAULT_FULL_EVERY: u64 = 30;

    /// `full_every` of 0 or 1 sends nothing but full snapshots.
    pub fn new(full_every: u64) -> Self {
        Self {
            full_every: full_every.max(1),
            seq: 0,
            since_full: 0,
            baseline: None,
        }
    }

    /// Makes the next frame a full snapshot.
    pub fn force_full(&mut self) {
        self.baseline = None;
    }

    /// Sequence number of the last frame produced.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Produces the next frame for `snapshot`.
    pub fn encode(&mut self, snapshot: &Snapshot) -> Frame {
        let next = Baseline::quantize(snapshot);
        self.seq += 1;

        let due_full = self.since_full + 1 >= self.full_every;
        let frame = match self.baseline.as_ref() {
            Some(prev) if !due_full => {
                self.since_full += 1;
                Frame::Delta(MinimapDelta {
                    v: MINIMAP_VERSION,
                    seq: self.seq,
                    base_seq: self.seq - 1,
                    enemies: diff_group(&prev.enemies, &next.enemies),
                    allies: diff_group(&prev.allies, &next.allies),
                    players: diff_group(&prev.players, &next.players),
                    chopper: next.chopper.filter(|p| prev.chopper != Some(*p)),
                    chopper_removed: prev.chopper.is_some() && next.chopper.is_none(),
                    relay_seq: None,
                })
            }
            _ => {
                self.since_full = 0;
                Frame::Full(MinimapFull {
                    v: MINIMAP_VERSION,
                    seq: self.seq,
                    enemies: next.enemies.values().cloned().collect(),
                    allies: next.allies.values().cloned().collect(),
                    players: next.players.values().cloned().collect(),
                    chopper: next.chopper,
                    relay_seq: None,
                })
            }
        };
        self.baseline = Some(next);
        frame
    }
}

impl Default for DeltaEncoder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FULL_EVERY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(enemies: Vec<SnapshotEntity>, chopper: Option<(f64, f64)>) -> Snapshot {
        Snapshot {
            enemies,
            chopper,
            ..Snapshot::default()
        }
    }

    #[test]
    fn test_encode_first_frame_is_full() {
        let mut encoder = DeltaEncoder::default();
        let frame = encoder.encode(&snapshot(vec![SnapshotEntity::new("e1", 0.5, 0.5)], None));
        match frame {
            Frame::Full(full) => {
                assert_eq!(full.seq, 1);
                assert_eq!(full.enemies.len(), 1);
                assert_eq!(full.enemies[0].x, 512);
            }
            other => panic!("expected full, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_unchanged_entities_are_omitted() {
        let mut encoder = DeltaEncoder::default();
        let a = SnapshotEntity::new("a", 0.1, 0.1);
        let b = SnapshotEntity::new("b", 0.2, 0.2);
        encoder.encode(&snapshot(vec![a.clone(), b], Some((0.5, 0.5))));

        let moved = SnapshotEntity::new("b", 0.9, 0.2);
        let frame = encoder.encode(&snapshot(vec![a, moved], Some((0.5, 0.5))));
        let Frame::Delta(delta) = frame else {
            panic!("expected delta");
        };
        assert_eq!(delta.base_seq, 1);
        assert_eq!(delta.seq, 2);
        assert_eq!(delta.enemies.upserts.len(), 1);
        assert_eq!(delta.enemies.upserts[0].id, "b");
        assert!(delta.enemies.removed.is_empty());
        assert!(delta.chopper.is_none());
        assert!(!delta.chopper_removed);
    }

    #[test]
    fn test_encode_sub_step_motion_is_omitted() {
        let mut encoder = DeltaEncoder::default();
        encoder.encode(&snapshot(vec![SnapshotEntity::new("a", 0.5, 0.5)], None));
        let frame = encoder.encode(&snapshot(vec![SnapshotEntity::new("a", 0.50001, 0.5)], None));
        let Frame::Delta(delta) = frame else {
            panic!("expected delta");
        };
        assert!(delta.enemies.is_empty());
    }

    #[test]
    fn test_encode_vanished_entities_and_chopper_are_removed() {
        let mut encoder = DeltaEncoder::default();
        encoder.encode(&snapshot(vec![SnapshotEntity::new("a", 0.1, 0.1)], Some((0.3, 0.3))));
        let Frame::Delta(delta) = encoder.encode(&Snapshot::default()) else {
            panic!("expected delta");
        };
        assert_eq!(delta.enemies.removed, vec!["a".to_string()]);
        assert!(delta.chopper_removed);
    }

    #[test]
    fn test_encode_emits_full_every_n_frames() {
        let mut encoder = DeltaEncoder::new(3);
        let kinds: Vec<bool> = (0..7)
            .map(|_| matches!(encoder.encode(&Snapshot::default()), Frame::Full(_)))
            .collect();
        assert_eq!(kinds, vec![true, false, false, true, false, false, true]);
        assert_eq!(encoder.seq(), 7);
    }

    #[test]
    fn test_force_full_makes_next_frame_full() {
        let mut encoder = DeltaEncoder::default();
        encoder.encode(&Snapshot::default());
        encoder.force_full();
        assert!(matches!(encoder.encode(&Snapshot::default()), Frame::Full(f) if f.seq == 2));
    }
}
