//! Error types for ride lifecycle logic.

use ridelink_proto::{Actor, RideState};
use thiserror::Error;

/// Why the state machine refused a command.
///
/// Checks run in declaration order: a stale version is reported before an
/// illegal edge, and an illegal edge before an unauthorized actor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// Caller's expected version is not the ride's current version
    #[error("stale version: expected {expected}, ride is at {actual}")]
    StaleVersion {
        /// Version the caller last saw
        expected: u64,
        /// Current version of the ride
        actual: u64,
    },

    /// No edge for this command from the current state
    #[error("invalid transition: cannot {command} a {from} ride")]
    InvalidTransition {
        /// Current state
        from: RideState,
        /// Command that was attempted
        command: &'static str,
    },

    /// Actor has the wrong role or is not a party to the ride
    #[error("unauthorized: {actor} may not {command} this ride")]
    UnauthorizedActor {
        /// Actor that issued the command
        actor: Actor,
        /// Command that was attempted
        command: &'static str,
    },
}

/// A ride request failed validation before any ride was created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Address is blank or too short to geocode
    #[error("invalid {field}: must be at least {min} characters")]
    InvalidAddress {
        /// Which address field
        field: &'static str,
        /// Minimum accepted length
        min: usize,
    },

    /// Quoted fare is zero
    #[error("invalid fare: must be positive")]
    InvalidFare,
}
