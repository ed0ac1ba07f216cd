//! Minimap wire frames and coordinate quantization.
//!
//! The game streams the positions of every entity on the map many times a
//! second. To keep those frames small, coordinates travel as integers in
//! `0..=QUANT_MAX` instead of floats, and most frames are deltas against
//! the previous one. Full snapshots are sent periodically so a receiver
//! that missed a delta can resynchronize.

use serde::{Deserialize, Serialize};

/// Protocol version carried in every minimap frame.
pub const MINIMAP_VERSION: u8 = 1;

/// Largest quantized coordinate value. Coordinates map `[0,1] → 0..=1023`.
pub const QUANT_MAX: u16 = 1023;

/// Maximum length of an entity identifier, in bytes.
pub const MAX_ENTITY_ID_LEN: usize = 32;

/// Maximum number of entries in any single group of one frame.
pub const MAX_GROUP_ENTITIES: usize = 512;

/// Maps a normalized coordinate to the wire range.
///
/// Out-of-range inputs are clamped and non-finite inputs map to 0, so the
/// result is always a valid wire value.
pub fn quantize(value: f64) -> u16 {
    if !value.is_finite() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * f64::from(QUANT_MAX)).round() as u16
}

/// Maps a wire coordinate back to `[0,1]`.
pub fn dequantize(q: u16) -> f64 {
    f64::from(q.min(QUANT_MAX)) / f64::from(QUANT_MAX)
}

/// One keyed entity in a minimap group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WireEntity {
    /// Stable identifier of the logical entity across frames.
    pub id: String,
    pub x: u16,
    pub y: u16,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub boss: bool,
}

/// A quantized position without identity (the player's chopper).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WirePoint {
    pub x: u16,
    pub y: u16,
}

/// `minimap_full`: the complete contents of every group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MinimapFull {
    pub v: u8,
    pub seq: u64,
    #[serde(default)]
    pub enemies: Vec<WireEntity>,
    #[serde(default)]
    pub allies: Vec<WireEntity>,
    #[serde(default)]
    pub players: Vec<WireEntity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chopper: Option<WirePoint>,
    /// Stamped by the relay on forwarded frames; never accepted inbound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_seq: Option<u64>,
}

/// Changes to one keyed group between two frames.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupDelta {
    /// Entities to insert, or overwrite by id.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upserts: Vec<WireEntity>,
    /// Ids to delete.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

impl GroupDelta {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removed.is_empty()
    }
}

/// `minimap_delta`: changes since the frame numbered `base_seq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MinimapDelta {
    pub v: u8,
    pub seq: u64,
    pub base_seq: u64,
    #[serde(default, skip_serializing_if = "GroupDelta::is_empty")]
    pub enemies: GroupDelta,
    #[serde(default, skip_serializing_if = "GroupDelta::is_empty")]
    pub allies: GroupDelta,
    #[serde(default, skip_serializing_if = "GroupDelta::is_empty")]
    pub players: GroupDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chopper: Option<WirePoint>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub chopper_removed: bool,
    /// Stamped by the relay on forwarded frames; never accepted inbound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_seq: Option<u64>,
}

/// Range checks shared by full and delta frames. Returns the offending
/// field name.
pub(crate) fn check_entities(entities: &[WireEntity]) -> Result<(), &'static str> {
    if entities.len() > MAX_GROUP_ENTITIES {
        return Err("entities");
    }
    for entity in entities {
        check_id(&entity.id)?;
        if entity.x > QUANT_MAX {
            return Err("x");
        }
        if entity.y > QUANT_MAX {
            return Err("y");
        }
    }
    Ok(())
}

pub(crate) fn check_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() || id.len() > MAX_ENTITY_ID_LEN {
        return Err("id");
    }
    Ok(())
}

pub(crate) fn check_point(point: Option<&WirePoint>) -> Result<(), &'static str> {
    match point {
        Some(p) if p.x > QUANT_MAX || p.y > QUANT_MAX => Err("chopper"),
        _ => Ok(()),
    }
}

impl MinimapFull {
    pub(crate) fn check_ranges(&self) -> Result<(), &'static str> {
        check_entities(&self.enemies)?;
        check_entities(&self.allies)?;
        check_entities(&self.players)?;
        check_point(self.chopper.as_ref())
    }
}

impl MinimapDelta {
    pub(crate) fn check_ranges(&self) -> Result<(), &'static str> {
        for group in [&self.enemies, &self.allies, &self.players] {
            check_entities(&group.upserts)?;
            if group.removed.len() > MAX_GROUP_ENTITIES {
                return Err("removed");
            }
            for id in &group.removed {
                check_id(id)?;
            }
        }
        if self.chopper.is_some() && self.chopper_removed {
            return Err("chopper_removed");
        }
        check_point(self.chopper.as_ref())
    }
}
