//! Ride payloads and the ride record carried inside them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::session::{Actor, Role};
use crate::{ActorId, RideId};

/// Vehicle classes a ride can be requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VehicleType {
    /// Three-wheeler
    Auto,
    /// Four-wheeler
    Car,
    /// Motorcycle
    Moto,
}

/// Lifecycle state of a ride.
///
/// ```text
/// requested ──► accepted ──► arriving ──► started ──► completed
///     │             │            │           │
///     └─────────────┴────────────┴───────────┴──────► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RideState {
    /// Waiting for a driver
    Requested,
    /// Driver assigned
    Accepted,
    /// Driver on the way to pickup
    Arriving,
    /// Trip in progress
    Started,
    /// Trip finished (terminal)
    Completed,
    /// Trip cancelled (terminal)
    Cancelled,
}

impl RideState {
    /// Every state, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Requested,
        Self::Accepted,
        Self::Arriving,
        Self::Started,
        Self::Completed,
        Self::Cancelled,
    ];

    /// No transition leaves a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// States in which a ride has an assigned driver.
    #[must_use]
    pub const fn has_driver(self) -> bool {
        matches!(self, Self::Accepted | Self::Arriving | Self::Started | Self::Completed)
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Accepted => "accepted",
            Self::Arriving => "arriving",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RideState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who cancelled a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancelledBy {
    /// The ride's rider
    Rider,
    /// The assigned driver
    Driver,
    /// The server's expiry sweep
    System,
}

impl From<Role> for CancelledBy {
    fn from(role: Role) -> Self {
        match role {
            Role::Rider => Self::Rider,
            Role::Driver => Self::Driver,
        }
    }
}

/// Vehicle shown to the rider once a driver accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    /// Registration plate
    pub plate: String,
    /// Paint color
    pub color: String,
    /// Vehicle class
    pub vehicle_type: VehicleType,
}

/// Public profile of a driver, captured when they accept a ride.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverProfile {
    /// Driver actor id
    pub driver_id: ActorId,
    /// Display name
    pub name: String,
    /// Vehicle the driver is using
    pub vehicle: Vehicle,
}

/// Durable ride record.
///
/// `driver_id` is set exactly while the state has an assigned driver.
/// `driver` keeps the accepting driver's profile even after a cancel
/// releases them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ride {
    /// Unique ride id
    pub ride_id: RideId,
    /// Rider who requested the ride
    pub rider_id: ActorId,
    /// Currently assigned driver
    pub driver_id: Option<ActorId>,
    /// Profile of the driver who accepted
    pub driver: Option<DriverProfile>,
    /// Lifecycle state
    pub state: RideState,
    /// Pickup address
    pub pickup: String,
    /// Destination address
    pub destination: String,
    /// Quoted fare in minor currency units
    pub fare: u64,
    /// Requested vehicle class
    pub vehicle_type: VehicleType,
    /// Creation time (Unix ms)
    pub created_at: u64,
    /// Time of the last accepted transition (Unix ms)
    pub updated_at: u64,
    /// Trip start (Unix ms)
    pub started_at: Option<u64>,
    /// Trip completion (Unix ms)
    pub completed_at: Option<u64>,
    /// Charged fare in minor currency units
    pub final_fare: Option<u64>,
    /// Who cancelled
    pub cancelled_by: Option<CancelledBy>,
    /// Free-form cancellation reason
    pub cancel_reason: Option<String>,
    /// Starts at 1, +1 per accepted transition
    pub version: u64,
}

impl Ride {
    /// Whether `actor` is this ride's rider or its currently assigned driver.
    #[must_use]
    pub fn involves(&self, actor: Actor) -> bool {
        match actor.role {
            Role::Rider => self.rider_id == actor.id,
            Role::Driver => self.driver_id == Some(actor.id),
        }
    }

    /// Rider actor of this ride.
    #[must_use]
    pub const fn rider(&self) -> Actor {
        Actor::rider(self.rider_id)
    }

    /// Currently assigned driver actor, if any.
    #[must_use]
    pub fn assigned_driver(&self) -> Option<Actor> {
        self.driver_id.map(Actor::driver)
    }

    /// Trip detail as offered to drivers.
    #[must_use]
    pub fn trip(&self) -> TripDetail {
        TripDetail {
            pickup: self.pickup.clone(),
            destination: self.destination.clone(),
            fare: self.fare,
            vehicle_type: self.vehicle_type,
        }
    }
}

/// What a driver needs to decide on and perform a trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripDetail {
    /// Pickup address
    pub pickup: String,
    /// Destination address
    pub destination: String,
    /// Quoted fare in minor currency units
    pub fare: u64,
    /// Requested vehicle class
    pub vehicle_type: VehicleType,
}

/// A requested change to a ride.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RideCommand {
    /// Driver takes the ride
    Accept {
        /// Accepting driver's public profile
        driver: DriverProfile,
    },
    /// Driver is heading to pickup
    Arrive,
    /// Rider picked up
    Start,
    /// Trip finished
    Complete {
        /// Charged fare; defaults to the quoted fare
        final_fare: Option<u64>,
    },
    /// Rider or assigned driver calls it off
    Cancel {
        /// Free-form reason
        reason: Option<String>,
    },
}

impl RideCommand {
    /// Command name for logs and error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Accept { .. } => "accept",
            Self::Arrive => "arrive",
            Self::Start => "start",
            Self::Complete { .. } => "complete",
            Self::Cancel { .. } => "cancel",
        }
    }
}

/// Client asks the server to apply a [`RideCommand`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    /// Target ride
    pub ride_id: RideId,
    /// Change to apply
    pub command: RideCommand,
    /// Version the client last saw
    pub expected_version: u64,
}

/// Reply to a successful [`TransitionRequest`], echoing its request id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionAccepted {
    /// Ride as persisted
    pub ride: Ride,
}

/// Name of a pushed ride event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RideEventKind {
    /// New ride offered to a candidate driver
    RideRequested,
    /// A driver accepted
    RideAccepted,
    /// Driver heading to pickup
    RideArriving,
    /// Trip started
    RideStarted,
    /// Trip completed
    RideCompleted,
    /// Ride cancelled
    RideCancelled,
}

impl RideEventKind {
    /// Kebab-case event name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RideRequested => "ride-requested",
            Self::RideAccepted => "ride-accepted",
            Self::RideArriving => "ride-arriving",
            Self::RideStarted => "ride-started",
            Self::RideCompleted => "ride-completed",
            Self::RideCancelled => "ride-cancelled",
        }
    }
}

impl fmt::Display for RideEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server push describing a ride change.
///
/// Clients key on `(ride.ride_id, ride.version)` and drop events that are not
/// newer than what they hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideEvent {
    /// What happened
    pub event: RideEventKind,
    /// Ride after the change
    pub ride: Ride,
    /// Driver profile, on the rider's `ride-accepted`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub driver: Option<DriverProfile>,
    /// Trip detail, on driver-facing offers and accepts
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub trip: Option<TripDetail>,
}

impl RideEvent {
    /// Ride this event is about.
    #[must_use]
    pub const fn ride_id(&self) -> RideId {
        self.ride.ride_id
    }

    /// Ride version after the change.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.ride.version
    }
}
