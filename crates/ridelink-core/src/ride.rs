//! Ride creation.
//!
//! A ride enters the system through [`new_ride`] in the `requested` state at
//! version 1. Every later change goes through [`crate::machine`].

use ridelink_proto::{ActorId, Ride, RideId, RideState, VehicleType};
use serde::{Deserialize, Serialize};

use crate::error::RequestError;

/// Shortest pickup or destination string accepted.
pub const MIN_ADDRESS_LEN: usize = 3;

/// Version assigned to a freshly created ride.
pub const INITIAL_VERSION: u64 = 1;

/// What a rider asks for. Fare comes from the (external) quote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideRequest {
    /// Pickup address
    pub pickup: String,
    /// Destination address
    pub destination: String,
    /// Quoted fare in minor currency units
    pub fare: u64,
    /// Requested vehicle class
    pub vehicle_type: VehicleType,
}

impl RideRequest {
    /// Reject requests that cannot be turned into a ride.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.pickup.trim().chars().count() < MIN_ADDRESS_LEN {
            return Err(RequestError::InvalidAddress { field: "pickup", min: MIN_ADDRESS_LEN });
        }
        if self.destination.trim().chars().count() < MIN_ADDRESS_LEN {
            return Err(RequestError::InvalidAddress {
                field: "destination",
                min: MIN_ADDRESS_LEN,
            });
        }
        if self.fare == 0 {
            return Err(RequestError::InvalidFare);
        }
        Ok(())
    }
}

/// Build a `requested` ride at version 1.
pub fn new_ride(
    ride_id: RideId,
    rider_id: ActorId,
    request: RideRequest,
    now_ms: u64,
) -> Result<Ride, RequestError> {
    request.validate()?;

    Ok(Ride {
        ride_id,
        rider_id,
        driver_id: None,
        driver: None,
        state: RideState::Requested,
        pickup: request.pickup,
        destination: request.destination,
        fare: request.fare,
        vehicle_type: request.vehicle_type,
        created_at: now_ms,
        updated_at: now_ms,
        started_at: None,
        completed_at: None,
        final_fare: None,
        cancelled_by: None,
        cancel_reason: None,
        version: INITIAL_VERSION,
    })
}
