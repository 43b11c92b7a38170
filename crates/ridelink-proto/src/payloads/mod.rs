//! CBOR-encoded protocol messages.
//!
//! Frame headers are raw binary, payloads are CBOR. The opcode in the header
//! identifies the payload type, so only the inner struct is serialized.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness).

pub mod ride;
pub mod session;

use bytes::BufMut;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Session Management
    /// Client identifies itself
    Join(session::Join),
    /// Server acknowledges a join
    Joined(session::Joined),
    /// Session is closing
    Goodbye(session::Goodbye),
    /// Keepalive request
    Ping,
    /// Keepalive response
    Pong,

    // Ride Lifecycle
    /// Client requests a transition
    TransitionRequest(ride::TransitionRequest),
    /// Transition committed
    TransitionAccepted(ride::TransitionAccepted),
    /// Pushed ride event
    RideEvent(ride::RideEvent),

    // Error frame
    /// Error response
    Error(ErrorPayload),
}

/// Error payload for error frames.
///
/// `status` carries the HTTP-equivalent status so channel and HTTP callers
/// see the same classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code identifying the type of error.
    pub code: u16,
    /// HTTP-equivalent status code.
    pub status: u16,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorPayload {
    /// Command not allowed in the ride's current state.
    pub const INVALID_TRANSITION: u16 = 0x0001;
    /// Actor may not issue this command on this ride.
    pub const UNAUTHORIZED_ACTOR: u16 = 0x0002;
    /// Expected version does not match the stored one.
    pub const STALE_VERSION: u16 = 0x0003;
    /// Ride does not exist.
    pub const NOT_FOUND: u16 = 0x0004;
    /// Storage operation failed.
    pub const STORAGE_ERROR: u16 = 0x0005;
    /// Malformed or unexpected frame.
    pub const INVALID_PAYLOAD: u16 = 0x0006;
    /// Frame requires a prior `Join`.
    pub const NOT_JOINED: u16 = 0x0007;
    /// Ride id already taken.
    pub const ALREADY_EXISTS: u16 = 0x0008;

    /// Create an error payload.
    pub fn new(code: u16, status: u16, message: impl Into<String>) -> Self {
        Self { code, status, message: message.into() }
    }

    /// Create an invalid payload error.
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PAYLOAD, 400, msg)
    }

    /// Create a not-joined error.
    pub fn not_joined() -> Self {
        Self::new(Self::NOT_JOINED, 401, "join required before this frame")
    }
}

fn encode_inner<T: Serialize>(inner: &T, dst: &mut impl BufMut) -> Result<()> {
    ciborium::ser::into_writer(inner, dst.writer())
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
}

fn decode_inner<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Join(_) => Opcode::Join,
            Self::Joined(_) => Opcode::Joined,
            Self::Goodbye(_) => Opcode::Goodbye,
            Self::Ping => Opcode::Ping,
            Self::Pong => Opcode::Pong,
            Self::TransitionRequest(_) => Opcode::TransitionRequest,
            Self::TransitionAccepted(_) => Opcode::TransitionAccepted,
            Self::RideEvent(_) => Opcode::RideEvent,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Encode payload to buffer.
    ///
    /// Serializes only the inner struct, not the variant tag. Size limits are
    /// enforced later by [`Frame::encode`].
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        match self {
            Self::Join(inner) => encode_inner(inner, dst),
            Self::Joined(inner) => encode_inner(inner, dst),
            Self::Goodbye(inner) => encode_inner(inner, dst),
            Self::Ping | Self::Pong => Ok(()), // Zero-byte payloads
            Self::TransitionRequest(inner) => encode_inner(inner, dst),
            Self::TransitionAccepted(inner) => encode_inner(inner, dst),
            Self::RideEvent(inner) => encode_inner(inner, dst),
            Self::Error(inner) => encode_inner(inner, dst),
        }
    }

    /// Decode payload from bytes based on opcode.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed `MAX_PAYLOAD_SIZE`
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let payload = match opcode {
            Opcode::Join => Self::Join(decode_inner(bytes)?),
            Opcode::Joined => Self::Joined(decode_inner(bytes)?),
            Opcode::Goodbye => Self::Goodbye(decode_inner(bytes)?),
            Opcode::Ping => Self::Ping,
            Opcode::Pong => Self::Pong,
            Opcode::TransitionRequest => Self::TransitionRequest(decode_inner(bytes)?),
            Opcode::TransitionAccepted => Self::TransitionAccepted(decode_inner(bytes)?),
            Opcode::RideEvent => Self::RideEvent(decode_inner(bytes)?),
            Opcode::Error => Self::Error(decode_inner(bytes)?),
        };

        Ok(payload)
    }

    /// Convert payload into a transport frame.
    ///
    /// Sets the header's opcode and payload size.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self, mut header: FrameHeader) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        header.opcode = self.opcode().to_u16().to_be_bytes();
        Ok(Frame::new(header, buf))
    }

    /// Frame with a fresh header carrying `request_id`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn to_frame(&self, request_id: u32) -> Result<Frame> {
        let mut header = FrameHeader::new(self.opcode());
        header.set_request_id(request_id);
        self.clone().into_frame(header)
    }

    /// Parse payload from a raw transport frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the opcode is not recognized
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    /// - `ProtocolError::PayloadTooLarge` if payload exceeds maximum size
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or_else(|| ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_ping_has_empty_body() {
        let frame = Payload::Ping.to_frame(3).expect("should create frame");
        assert!(frame.payload.is_empty());
        assert_eq!(frame.header.request_id(), 3);
        assert_eq!(Payload::from_frame(&frame).expect("should parse"), Payload::Ping);
    }

    #[test]
    fn payload_error_round_trip() {
        let payload = Payload::Error(ErrorPayload::new(ErrorPayload::STALE_VERSION, 409, "stale"));

        let frame = payload.to_frame(0).expect("should create frame");
        let decoded = Payload::from_frame(&frame).expect("should parse payload");
        assert_eq!(payload, decoded);
    }

    #[test]
    fn opcode_mismatch_fails_decode() {
        let join = Payload::Join(session::Join { role: session::Role::Rider, actor_id: 1 });
        let frame = join.to_frame(0).expect("should create frame");

        assert!(matches!(
            Payload::decode(Opcode::TransitionRequest, &frame.payload),
            Err(ProtocolError::CborDecode(_))
        ));
    }

    #[test]
    fn unknown_opcode_rejected() {
        let mut frame = Payload::Ping.to_frame(0).expect("should create frame");
        frame.header.opcode = 0xBEEFu16.to_be_bytes();

        assert_eq!(Payload::from_frame(&frame), Err(ProtocolError::UnknownOpcode(0xBEEF)));
    }
}
