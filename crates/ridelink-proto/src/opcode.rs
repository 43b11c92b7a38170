//! Frame operation codes.

/// Operation code identifying a frame's payload type.
///
/// Session frames live in `0x00xx`, ride frames in `0x01xx`, and errors in
/// `0x0Fxx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Client announces its actor identity (once per connection)
    Join,
    /// Server acknowledges a join
    Joined,
    /// Either side is closing the session
    Goodbye,
    /// Keepalive request
    Ping,
    /// Keepalive response
    Pong,
    /// Client asks for a ride state transition
    TransitionRequest,
    /// Server accepted a transition request
    TransitionAccepted,
    /// Server pushes a ride lifecycle event
    RideEvent,
    /// Error response
    Error,
}

impl Opcode {
    /// Every known opcode.
    pub const ALL: [Self; 9] = [
        Self::Join,
        Self::Joined,
        Self::Goodbye,
        Self::Ping,
        Self::Pong,
        Self::TransitionRequest,
        Self::TransitionAccepted,
        Self::RideEvent,
        Self::Error,
    ];

    /// Wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::Join => 0x0001,
            Self::Joined => 0x0002,
            Self::Goodbye => 0x0003,
            Self::Ping => 0x0004,
            Self::Pong => 0x0005,
            Self::TransitionRequest => 0x0101,
            Self::TransitionAccepted => 0x0102,
            Self::RideEvent => 0x0103,
            Self::Error => 0x0F01,
        }
    }

    /// Parse a wire value. `None` if unrecognized.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Join),
            0x0002 => Some(Self::Joined),
            0x0003 => Some(Self::Goodbye),
            0x0004 => Some(Self::Ping),
            0x0005 => Some(Self::Pong),
            0x0101 => Some(Self::TransitionRequest),
            0x0102 => Some(Self::TransitionAccepted),
            0x0103 => Some(Self::RideEvent),
            0x0F01 => Some(Self::Error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_values_are_unique_and_reversible() {
        for opcode in Opcode::ALL {
            assert_eq!(Opcode::from_u16(opcode.to_u16()), Some(opcode));
        }

        let mut values: Vec<u16> = Opcode::ALL.iter().map(|o| o.to_u16()).collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), Opcode::ALL.len());
    }

    #[test]
    fn unknown_opcode_is_none() {
        assert_eq!(Opcode::from_u16(0xBEEF), None);
    }
}
