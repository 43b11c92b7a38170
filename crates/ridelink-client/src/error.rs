//! Client errors.

use ridelink_proto::{ProtocolError, RideId};
use thiserror::Error;

/// Why the client refused an event.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Frame could not be decoded or is not valid from a server.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// What was wrong with it
        reason: String,
    },

    /// Operation needs a joined session.
    #[error("not joined")]
    NotJoined,

    /// `Connect` while a join is already pending or complete.
    #[error("already connected")]
    AlreadyConnected,

    /// Transition requested for a ride the client has never seen.
    #[error("unknown ride: {ride_id:032x}")]
    UnknownRide {
        /// Requested ride
        ride_id: RideId,
    },

    /// Frame encoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
