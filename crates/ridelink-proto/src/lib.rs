//! Ridelink wire protocol.
//!
//! Every message on the coordination channel is a [`Frame`]: a fixed 16-byte
//! big-endian [`FrameHeader`] followed by a CBOR-encoded payload. The header
//! carries the [`Opcode`] that identifies the payload type, so the payload
//! itself has no variant tag.
//!
//! # Components
//!
//! - [`FrameHeader`]: zero-copy header (magic, version, opcode, request id,
//!   payload size)
//! - [`Frame`]: header plus raw payload bytes
//! - [`Payload`]: typed view of a frame's contents
//! - [`ProtocolError`]: framing and encoding failures

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod errors;
mod frame;
mod header;
mod opcode;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcode::Opcode;
pub use payloads::{
    ErrorPayload, Payload,
    ride::{
        CancelledBy, DriverProfile, Ride, RideCommand, RideEvent, RideEventKind, RideState,
        TripDetail, Vehicle, VehicleType,
    },
    session::{Actor, CloseReason, Role},
};

/// Identifier of a rider or driver.
pub type ActorId = u64;

/// Identifier of a ride.
pub type RideId = u128;

/// Identifier of one live connection.
pub type SessionId = u64;

/// ALPN protocol identifier negotiated on the QUIC handshake.
pub const ALPN_PROTOCOL: &[u8] = b"ridelink";
