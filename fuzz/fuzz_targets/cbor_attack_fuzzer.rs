//! Fuzz target for hostile CBOR aimed at ride payload fields
//!
//! # Strategy
//!
//! Start from a well-formed payload (`TransitionRequest`, `RideEvent`,
//! `TransitionAccepted`, `Join`, `Error`), walk down to one of its fields
//! (following nested maps such as `command.driver.vehicle` or `ride.driver`),
//! and corrupt it:
//!
//! - Drop the field, or repeat its key with a second value
//! - Swap the value for another CBOR type (null, text, bytes, float, bool)
//! - Negative integers where ids, fares and versions are unsigned
//! - Bignums wider than the 128-bit `ride_id`
//! - Unknown variant names for `type`, `state`, `role`, `vehicle_type`
//! - Deeply nested arrays in place of a scalar
//!
//! # Invariants
//!
//! - NEVER panic on malformed CBOR
//! - A payload that decodes reports the opcode it was decoded under
//! - A payload that decodes survives re-encoding unchanged

#![no_main]

use arbitrary::Arbitrary;
use ciborium::value::{Integer, Value};
use libfuzzer_sys::fuzz_target;
use ridelink_proto::{
    DriverProfile, ErrorPayload, Frame, FrameHeader, Opcode, Payload, Ride, RideCommand,
    RideEvent, RideEventKind, RideState, Role, Vehicle, VehicleType,
    payloads::{
        ride::{TransitionAccepted, TransitionRequest},
        session::Join,
    },
};

#[derive(Debug, Clone, Arbitrary)]
struct Attack {
    target: Target,
    /// Field choice at each map level, outermost first
    path: Vec<u8>,
    corruption: Corruption,
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Target {
    TransitionRequest,
    RideEvent,
    TransitionAccepted,
    Join,
    Error,
}

#[derive(Debug, Clone, Arbitrary)]
enum Corruption {
    Remove,
    DuplicateKey(Hostile),
    Replace(Hostile),
}

#[derive(Debug, Clone, Arbitrary)]
enum Hostile {
    Null,
    Bool(bool),
    Negative(i64),
    /// Tag 2 bignum of `len % 40` bytes of 0xFF
    Bignum { len: u8 },
    Text(String),
    Bytes(Vec<u8>),
    Float(f64),
    UnknownVariant(VariantName),
    Nested { depth: u8 },
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum VariantName {
    Upper,
    SnakeCase,
    Empty,
    Terminal,
}

impl Hostile {
    fn value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Negative(n) => {
                let magnitude = n.unsigned_abs().min(i64::MAX as u64) as i64;
                Value::Integer(Integer::from(-magnitude - 1))
            }
            Self::Bignum { len } => {
                Value::Tag(2, Box::new(Value::Bytes(vec![0xFF; usize::from(*len % 40)])))
            }
            Self::Text(s) => Value::Text(s.clone()),
            Self::Bytes(b) => Value::Bytes(b.clone()),
            Self::Float(f) => Value::Float(*f),
            Self::UnknownVariant(name) => Value::Text(
                match name {
                    VariantName::Upper => "ACCEPT",
                    VariantName::SnakeCase => "ride_accepted",
                    VariantName::Empty => "",
                    VariantName::Terminal => "expired",
                }
                .into(),
            ),
            Self::Nested { depth } => {
                let mut value = Value::Integer(Integer::from(1u8));
                for _ in 0..(*depth % 64) {
                    value = Value::Array(vec![value]);
                }
                value
            }
        }
    }
}

fn driver() -> DriverProfile {
    DriverProfile {
        driver_id: 42,
        name: "Asha".into(),
        vehicle: Vehicle {
            plate: "KA01-1234".into(),
            color: "white".into(),
            vehicle_type: VehicleType::Auto,
        },
    }
}

fn ride() -> Ride {
    Ride {
        ride_id: u128::from(u64::MAX) + 7,
        rider_id: 7,
        driver_id: Some(42),
        driver: Some(driver()),
        state: RideState::Accepted,
        pickup: "MG Road".into(),
        destination: "Koramangala".into(),
        fare: 310,
        vehicle_type: VehicleType::Auto,
        created_at: 1_700_000_000_000,
        updated_at: 1_700_000_060_000,
        started_at: None,
        completed_at: None,
        final_fare: None,
        cancelled_by: None,
        cancel_reason: None,
        version: 2,
    }
}

/// Well-formed payload for `target`, as a CBOR value tree.
fn baseline(target: Target) -> Option<(Opcode, Value)> {
    let (opcode, value) = match target {
        Target::TransitionRequest => (
            Opcode::TransitionRequest,
            Value::serialized(&TransitionRequest {
                ride_id: ride().ride_id,
                command: RideCommand::Accept { driver: driver() },
                expected_version: 1,
            }),
        ),
        Target::RideEvent => (
            Opcode::RideEvent,
            Value::serialized(&RideEvent {
                event: RideEventKind::RideAccepted,
                ride: ride(),
                driver: Some(driver()),
                trip: Some(ride().trip()),
            }),
        ),
        Target::TransitionAccepted => {
            (Opcode::TransitionAccepted, Value::serialized(&TransitionAccepted { ride: ride() }))
        }
        Target::Join => {
            (Opcode::Join, Value::serialized(&Join { role: Role::Driver, actor_id: 42 }))
        }
        Target::Error => (
            Opcode::Error,
            Value::serialized(&ErrorPayload {
                code: ErrorPayload::STALE_VERSION,
                status: 409,
                message: "stale version".into(),
            }),
        ),
    };
    value.ok().map(|v| (opcode, v))
}

/// Walk `path` down through nested maps and corrupt the entry it lands on.
fn corrupt(value: &mut Value, path: &[u8], corruption: &Corruption) {
    let Value::Map(entries) = value else {
        return;
    };
    let Some((&choice, rest)) = path.split_first() else {
        return;
    };
    if entries.is_empty() {
        return;
    }
    let index = usize::from(choice) % entries.len();

    // Descend while the chosen entry is itself a map and the path goes on
    if !rest.is_empty() && matches!(entries[index].1, Value::Map(_)) {
        corrupt(&mut entries[index].1, rest, corruption);
        return;
    }

    match corruption {
        Corruption::Remove => {
            entries.remove(index);
        }
        Corruption::DuplicateKey(hostile) => {
            let key = entries[index].0.clone();
            entries.push((key, hostile.value()));
        }
        Corruption::Replace(hostile) => entries[index].1 = hostile.value(),
    }
}

fuzz_target!(|attack: Attack| {
    let Some((opcode, mut value)) = baseline(attack.target) else {
        return;
    };
    corrupt(&mut value, &attack.path, &attack.corruption);

    let mut bytes = Vec::new();
    if ciborium::into_writer(&value, &mut bytes).is_err() {
        return;
    }

    let frame = Frame::new(FrameHeader::new(opcode), bytes);
    let Ok(payload) = Payload::from_frame(&frame) else {
        return;
    };

    assert_eq!(payload.opcode(), opcode);

    let reencoded = payload.to_frame(0).expect("decoded payload must re-encode");
    let again = Payload::from_frame(&reencoded).expect("re-encoded payload must decode");
    assert_eq!(again, payload);
});
