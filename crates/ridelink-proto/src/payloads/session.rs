//! Session management payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ride::Ride;
use crate::{ActorId, SessionId};

/// Which side of a ride an actor is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Requests rides
    Rider,
    /// Accepts and drives rides
    Driver,
}

impl Role {
    /// Lowercase name as used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rider => "rider",
            Self::Driver => "driver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical party, independent of any connection.
///
/// Riders and drivers have separate id spaces, so the role is part of the
/// identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Actor {
    /// Identifier issued by the (external) account service
    pub id: ActorId,
    /// Side of the ride
    pub role: Role,
}

impl Actor {
    /// Rider actor.
    #[must_use]
    pub const fn rider(id: ActorId) -> Self {
        Self { id, role: Role::Rider }
    }

    /// Driver actor.
    #[must_use]
    pub const fn driver(id: ActorId) -> Self {
        Self { id, role: Role::Driver }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.id)
    }
}

/// Client announces who it is. Sent once, as the first frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    /// Role of the joining actor
    pub role: Role,
    /// Actor identifier
    pub actor_id: ActorId,
}

impl Join {
    /// Actor this join is for.
    #[must_use]
    pub const fn actor(&self) -> Actor {
        Actor { id: self.actor_id, role: self.role }
    }
}

/// Server acknowledgement of a [`Join`].
///
/// Sent once any queued events have been replayed as `RideEvent` frames, so
/// a client that sees `Joined` is caught up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Joined {
    /// Server-assigned session identifier
    pub session_id: SessionId,
    /// Number of queued events replayed to this session
    pub replayed: u32,
    /// Non-terminal rides involving the actor, for UI restore
    pub active_rides: Vec<Ride>,
}

/// Why a session is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    /// The same actor joined again from another connection
    ReplacedByNewSession,
    /// A push did not complete within the delivery timeout
    DeliveryTimeout,
    /// The transport reported a write failure
    TransportFailed,
    /// Server is shutting down
    ServerShutdown,
    /// Client asked to leave
    ClientLeave,
}

impl CloseReason {
    /// Kebab-case name as used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReplacedByNewSession => "replaced-by-new-session",
            Self::DeliveryTimeout => "delivery-timeout",
            Self::TransportFailed => "transport-failed",
            Self::ServerShutdown => "server-shutdown",
            Self::ClientLeave => "client-leave",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Graceful disconnect notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    /// Why the session ends
    pub reason: CloseReason,
}
