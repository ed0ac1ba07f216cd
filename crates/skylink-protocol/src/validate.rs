//! Inbound frame validation.
//!
//! Every frame from every connection passes through [`Validator::validate`]
//! before the router sees it. The checks run in a fixed order and each one
//! can only narrow what the next sees:
//!
//! 1. raw size against the frame limits
//! 2. JSON object at the top level
//! 3. a known `type` discriminator
//! 4. exactly the declared field names
//! 5. scalar values only, unless the type carries minimap groups
//! 6. typed decode and range checks
//!
//! Out-of-range coordinates are rejected rather than clamped so that nothing
//! the relay forwards was silently rewritten.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::types::{Impact, Join, NewWave, Ping, Point, Rejoin, StateChange};
use crate::{ClientMessage, MinimapDelta, MinimapFull, ValidationError};

/// Length of a session code.
const CODE_LEN: usize = 6;
/// Length of a reconnect token.
const TOKEN_LEN: usize = 12;
/// Upper bound on `kills` in impact reports.
const MAX_KILLS: u32 = 10_000;

/// Size limits for inbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Limit for every control message, in bytes.
    pub max_frame_bytes: usize,
    /// Limit for `minimap_full` / `minimap_delta` frames, in bytes. Also
    /// the hard cap on anything the relay writes.
    pub max_snapshot_bytes: usize,
}

impl FrameLimits {
    /// The largest frame of any type. Transports cap messages here so
    /// nothing bigger is ever buffered.
    pub fn ceiling(&self) -> usize {
        self.max_snapshot_bytes.max(self.max_frame_bytes)
    }
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_frame_bytes: 512,
            max_snapshot_bytes: 32 * 1024,
        }
    }
}

/// Declared shape of one message type.
struct Schema {
    kind: &'static str,
    fields: &'static [&'static str],
    /// Whether field values may be arrays/objects (minimap groups).
    nested: bool,
}

const SCHEMAS: &[Schema] = &[
    Schema { kind: "join", fields: &["code", "role"], nested: false },
    Schema { kind: "rejoin", fields: &["token", "role"], nested: false },
    Schema { kind: "ping", fields: &["t", "rtt"], nested: false },
    Schema { kind: "helicopter_drop", fields: &["x", "y"], nested: false },
    Schema { kind: "supply_drop", fields: &["x", "y"], nested: false },
    Schema { kind: "emp_drop", fields: &["x", "y"], nested: false },
    Schema { kind: "radar_ping", fields: &[], nested: false },
    Schema { kind: "chopper_input", fields: &["x", "y"], nested: false },
    Schema {
        kind: "minimap_full",
        fields: &["v", "seq", "enemies", "allies", "players", "chopper"],
        nested: true,
    },
    Schema {
        kind: "minimap_delta",
        fields: &[
            "v",
            "seq",
            "base_seq",
            "enemies",
            "allies",
            "players",
            "chopper",
            "chopper_removed",
        ],
        nested: true,
    },
    Schema { kind: "bomb_impact", fields: &["x", "y", "kills"], nested: false },
    Schema { kind: "supply_impact", fields: &["x", "y", "kills"], nested: false },
    Schema { kind: "game_state", fields: &["state", "wave"], nested: false },
    Schema { kind: "new_wave", fields: &["wave"], nested: false },
];

/// Parses raw frames into [`ClientMessage`]s or rejects them.
///
/// Stateless apart from its limits, so one instance is shared by every
/// connection.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    limits: FrameLimits,
}

impl Validator {
    pub fn new(limits: FrameLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> FrameLimits {
        self.limits
    }

    /// Validates one raw frame.
    ///
    /// # Errors
    /// Returns the first [`ValidationError`] the frame trips.
    pub fn validate(&self, raw: &[u8]) -> Result<ClientMessage, ValidationError> {
        let ceiling = self.limits.ceiling();
        if raw.len() > ceiling {
            return Err(ValidationError::TooLarge {
                size: raw.len(),
                limit: ceiling,
            });
        }

        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        let Value::Object(mut object) = value else {
            return Err(ValidationError::NotAnObject);
        };

        let kind = match object.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(ValidationError::MissingType),
        };
        let schema = SCHEMAS
            .iter()
            .find(|s| s.kind == kind)
            .ok_or(ValidationError::UnknownType(kind))?;

        let limit = if schema.nested {
            self.limits.max_snapshot_bytes
        } else {
            self.limits.max_frame_bytes
        };
        if raw.len() > limit {
            return Err(ValidationError::TooLarge {
                size: raw.len(),
                limit,
            });
        }

        for (field, value) in &object {
            if !schema.fields.contains(&field.as_str()) {
                return Err(ValidationError::UnexpectedField {
                    kind: schema.kind,
                    field: field.clone(),
                });
            }
            if !schema.nested && (value.is_array() || value.is_object()) {
                return Err(ValidationError::NotFlat {
                    kind: schema.kind,
                    field: field.clone(),
                });
            }
        }

        build(schema.kind, object)
    }
}

fn decode<T: DeserializeOwned>(
    kind: &'static str,
    object: Map<String, Value>,
) -> Result<T, ValidationError> {
    serde_json::from_value(Value::Object(object)).map_err(|e| ValidationError::Schema {
        kind,
        detail: e.to_string(),
    })
}

fn out_of_range(kind: &'static str, field: &'static str) -> ValidationError {
    ValidationError::OutOfRange { kind, field }
}

/// Checks both coordinates lie in `[min, 1]`. NaN never passes.
fn check_point(kind: &'static str, point: &Point, min: f64) -> Result<(), ValidationError> {
    if !(min..=1.0).contains(&point.x) {
        return Err(out_of_range(kind, "x"));
    }
    if !(min..=1.0).contains(&point.y) {
        return Err(out_of_range(kind, "y"));
    }
    Ok(())
}

fn check_impact(kind: &'static str, impact: &Impact) -> Result<(), ValidationError> {
    check_point(kind, &Point { x: impact.x, y: impact.y }, 0.0)?;
    if impact.kills.is_some_and(|k| k > MAX_KILLS) {
        return Err(out_of_range(kind, "kills"));
    }
    Ok(())
}

fn is_identifier(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn build(kind: &'static str, object: Map<String, Value>) -> Result<ClientMessage, ValidationError> {
    let msg = match kind {
        "join" => {
            let join: Join = decode(kind, object)?;
            if !is_identifier(&join.code, CODE_LEN) {
                return Err(out_of_range(kind, "code"));
            }
            ClientMessage::Join(join)
        }
        "rejoin" => {
            let rejoin: Rejoin = decode(kind, object)?;
            if !is_identifier(&rejoin.token, TOKEN_LEN) {
                return Err(out_of_range(kind, "token"));
            }
            ClientMessage::Rejoin(rejoin)
        }
        "ping" => ClientMessage::Ping(decode::<Ping>(kind, object)?),
        "helicopter_drop" | "supply_drop" | "emp_drop" => {
            let point: Point = decode(kind, object)?;
            check_point(kind, &point, 0.0)?;
            match kind {
                "helicopter_drop" => ClientMessage::HelicopterDrop(point),
                "supply_drop" => ClientMessage::SupplyDrop(point),
                _ => ClientMessage::EmpDrop(point),
            }
        }
        "radar_ping" => ClientMessage::RadarPing,
        "chopper_input" => {
            let point: Point = decode(kind, object)?;
            check_point(kind, &point, -1.0)?;
            ClientMessage::ChopperInput(point)
        }
        "minimap_full" => {
            let frame: MinimapFull = decode(kind, object)?;
            frame.check_ranges().map_err(|field| out_of_range(kind, field))?;
            ClientMessage::MinimapFull(frame)
        }
        "minimap_delta" => {
            let frame: MinimapDelta = decode(kind, object)?;
            frame.check_ranges().map_err(|field| out_of_range(kind, field))?;
            ClientMessage::MinimapDelta(frame)
        }
        "bomb_impact" | "supply_impact" => {
            let impact: Impact = decode(kind, object)?;
            check_impact(kind, &impact)?;
            if kind == "bomb_impact" {
                ClientMessage::BombImpact(impact)
            } else {
                ClientMessage::SupplyImpact(impact)
            }
        }
        "game_state" => ClientMessage::GameState(decode::<StateChange>(kind, object)?),
        "new_wave" => ClientMessage::NewWave(decode::<NewWave>(kind, object)?),
        other => return Err(ValidationError::UnknownType(other.to_string())),
    };
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AbilityKind, GamePhase, Role, WirePoint};

    fn validate(json: &str) -> Result<ClientMessage, ValidationError> {
        Validator::default().validate(json.as_bytes())
    }

    // =====================================================================
    // Accepted frames
    // =====================================================================

    #[test]
    fn test_validate_join_accepts_well_formed_frame() {
        let msg = validate(r#"{"type":"join","code":"ABC234","role":"companion"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join(Join {
                code: "ABC234".into(),
                role: Role::Companion,
            })
        );
    }

    #[test]
    fn test_validate_helicopter_drop_maps_to_bomb() {
        let msg = validate(r#"{"type":"helicopter_drop","x":0.5,"y":1}"#).unwrap();
        assert_eq!(msg.ability(), Some(AbilityKind::Bomb));
    }

    #[test]
    fn test_validate_chopper_input_accepts_negative_direction() {
        let msg = validate(r#"{"type":"chopper_input","x":-1,"y":0.3}"#).unwrap();
        assert_eq!(msg, ClientMessage::ChopperInput(Point { x: -1.0, y: 0.3 }));
    }

    #[test]
    fn test_validate_ping_with_round_trip_report() {
        assert_eq!(
            validate(r#"{"type":"ping","t":5,"rtt":42.5}"#).unwrap(),
            ClientMessage::Ping(Ping { t: 5, rtt: Some(42.5) })
        );
        assert_eq!(
            validate(r#"{"type":"ping","t":5}"#).unwrap(),
            ClientMessage::Ping(Ping { t: 5, rtt: None })
        );
        assert!(validate(r#"{"type":"ping","t":5,"rtt":"fast"}"#).is_err());
    }

    #[test]
    fn test_validate_radar_ping_has_no_fields() {
        assert_eq!(validate(r#"{"type":"radar_ping"}"#).unwrap(), ClientMessage::RadarPing);
    }

    #[test]
    fn test_validate_game_state_with_wave() {
        let msg = validate(r#"{"type":"game_state","state":"shopping","wave":3}"#).unwrap();
        match msg {
            ClientMessage::GameState(change) => {
                assert_eq!(change.state, GamePhase::Shopping);
                assert_eq!(change.wave, Some(3));
                assert_eq!(change.relay_seq, None);
            }
            other => panic!("expected GameState, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_minimap_full_with_groups() {
        let msg = validate(
            r#"{"type":"minimap_full","v":1,"seq":7,
                "enemies":[{"id":"e1","x":10,"y":1023,"boss":true}],
                "allies":[],"players":[{"id":"p1","x":0,"y":0}],
                "chopper":{"x":512,"y":512}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::MinimapFull(frame) => {
                assert_eq!(frame.seq, 7);
                assert_eq!(frame.enemies.len(), 1);
                assert!(frame.enemies[0].boss);
                assert_eq!(frame.chopper, Some(WirePoint { x: 512, y: 512 }));
            }
            other => panic!("expected MinimapFull, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_minimap_delta_defaults_missing_groups() {
        let msg = validate(
            r#"{"type":"minimap_delta","v":1,"seq":8,"base_seq":7,
                "enemies":{"removed":["e1"]}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::MinimapDelta(delta) => {
                assert_eq!(delta.enemies.removed, vec!["e1".to_string()]);
                assert!(delta.allies.is_empty());
                assert!(!delta.chopper_removed);
            }
            other => panic!("expected MinimapDelta, got {other:?}"),
        }
    }

    // =====================================================================
    // Rejected frames
    // =====================================================================

    #[test]
    fn test_validate_oversized_control_frame_is_rejected() {
        let padding = "A".repeat(600);
        let json = format!(r#"{{"type":"ping","t":1,"pad":"{padding}"}}"#);
        assert!(matches!(
            validate(&json),
            Err(ValidationError::TooLarge { limit: 512, .. })
        ));
    }

    #[test]
    fn test_validate_frame_over_snapshot_limit_is_rejected_before_parsing() {
        let raw = vec![b' '; 40 * 1024];
        assert!(matches!(
            Validator::default().validate(&raw),
            Err(ValidationError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_validate_non_object_is_rejected() {
        assert_eq!(validate("[1,2,3]"), Err(ValidationError::NotAnObject));
        assert_eq!(validate("\"join\""), Err(ValidationError::NotAnObject));
    }

    #[test]
    fn test_validate_malformed_json_is_rejected() {
        assert!(matches!(validate("{nope"), Err(ValidationError::Malformed(_))));
    }

    #[test]
    fn test_validate_missing_or_non_string_type_is_rejected() {
        assert_eq!(validate(r#"{"x":1}"#), Err(ValidationError::MissingType));
        assert_eq!(validate(r#"{"type":5}"#), Err(ValidationError::MissingType));
    }

    #[test]
    fn test_validate_unknown_type_is_rejected() {
        assert_eq!(
            validate(r#"{"type":"nuke"}"#),
            Err(ValidationError::UnknownType("nuke".into()))
        );
    }

    #[test]
    fn test_validate_extra_field_is_rejected() {
        assert!(matches!(
            validate(r#"{"type":"radar_ping","x":1}"#),
            Err(ValidationError::UnexpectedField { kind: "radar_ping", .. })
        ));
    }

    #[test]
    fn test_validate_relay_seq_is_not_accepted_inbound() {
        assert!(matches!(
            validate(r#"{"type":"bomb_impact","x":0.1,"y":0.1,"relay_seq":4}"#),
            Err(ValidationError::UnexpectedField { .. })
        ));
    }

    #[test]
    fn test_validate_nested_value_in_flat_type_is_rejected() {
        assert!(matches!(
            validate(r#"{"type":"helicopter_drop","x":{"a":1},"y":0.5}"#),
            Err(ValidationError::NotFlat { .. })
        ));
    }

    #[test]
    fn test_validate_drop_outside_unit_square_is_rejected_not_clamped() {
        assert_eq!(
            validate(r#"{"type":"supply_drop","x":1.5,"y":0.5}"#),
            Err(ValidationError::OutOfRange { kind: "supply_drop", field: "x" })
        );
        assert_eq!(
            validate(r#"{"type":"emp_drop","x":0.5,"y":-0.01}"#),
            Err(ValidationError::OutOfRange { kind: "emp_drop", field: "y" })
        );
    }

    #[test]
    fn test_validate_chopper_input_outside_direction_range_is_rejected() {
        assert!(matches!(
            validate(r#"{"type":"chopper_input","x":-1.2,"y":0}"#),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_validate_wrong_field_type_is_rejected() {
        assert!(matches!(
            validate(r#"{"type":"helicopter_drop","x":"0.5","y":0.5}"#),
            Err(ValidationError::Schema { .. })
        ));
        assert!(matches!(
            validate(r#"{"type":"join","code":"ABC234","role":"admin"}"#),
            Err(ValidationError::Schema { .. })
        ));
    }

    #[test]
    fn test_validate_missing_required_field_is_rejected() {
        assert!(matches!(
            validate(r#"{"type":"helicopter_drop","x":0.5}"#),
            Err(ValidationError::Schema { .. })
        ));
    }

    #[test]
    fn test_validate_bad_code_and_token_shapes_are_rejected() {
        assert!(matches!(
            validate(r#"{"type":"join","code":"ABC","role":"game"}"#),
            Err(ValidationError::OutOfRange { field: "code", .. })
        ));
        assert!(matches!(
            validate(r#"{"type":"rejoin","token":"short","role":"game"}"#),
            Err(ValidationError::OutOfRange { field: "token", .. })
        ));
    }

    #[test]
    fn test_validate_minimap_coordinate_over_quant_max_is_rejected() {
        assert!(matches!(
            validate(r#"{"type":"minimap_full","v":1,"seq":1,"enemies":[{"id":"e","x":1024,"y":0}]}"#),
            Err(ValidationError::OutOfRange { kind: "minimap_full", field: "x" })
        ));
    }

    #[test]
    fn test_validate_minimap_entity_extra_field_is_rejected() {
        assert!(matches!(
            validate(r#"{"type":"minimap_full","v":1,"seq":1,"allies":[{"id":"a","x":1,"y":1,"hp":3}]}"#),
            Err(ValidationError::Schema { .. })
        ));
    }

    #[test]
    fn test_validate_excessive_kills_is_rejected() {
        assert!(matches!(
            validate(r#"{"type":"bomb_impact","x":0.5,"y":0.5,"kills":99999}"#),
            Err(ValidationError::OutOfRange { field: "kills", .. })
        ));
    }
}
