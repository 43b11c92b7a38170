//! Version-gated view of the rides a client knows about.
//!
//! Events can arrive twice (a replay racing a transition reply) or out of
//! order across rides. The tracker keeps, per ride, only the highest version
//! it has seen, so applying anything not strictly newer is a no-op.
//!
//! Pruned rides leave their final version behind, so a replay that arrives
//! after pruning cannot bring back an older state.

use std::collections::HashMap;

use ridelink_proto::{Ride, RideEvent, RideId};

/// Latest known state of each ride.
#[derive(Debug, Clone, Default)]
pub struct RideTracker {
    rides: HashMap<RideId, Ride>,
    /// Final version of each pruned terminal ride
    pruned: HashMap<RideId, u64>,
}

impl RideTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `ride` if it is newer than what is held.
    ///
    /// Returns `true` when the tracker changed.
    pub fn apply(&mut self, ride: &Ride) -> bool {
        if self.pruned.get(&ride.ride_id).is_some_and(|&last| last >= ride.version) {
            return false;
        }

        match self.rides.get(&ride.ride_id) {
            Some(held) if held.version >= ride.version => false,
            _ => {
                self.rides.insert(ride.ride_id, ride.clone());
                true
            },
        }
    }

    /// Apply the ride carried by a pushed event.
    pub fn apply_event(&mut self, event: &RideEvent) -> bool {
        self.apply(&event.ride)
    }

    /// Tracked ride, if any.
    pub fn get(&self, ride_id: RideId) -> Option<&Ride> {
        self.rides.get(&ride_id)
    }

    /// Version held for a ride.
    pub fn version(&self, ride_id: RideId) -> Option<u64> {
        self.rides.get(&ride_id).map(|ride| ride.version)
    }

    /// Rides that can still change.
    pub fn active(&self) -> impl Iterator<Item = &Ride> {
        self.rides.values().filter(|ride| !ride.state.is_terminal())
    }

    /// Forget completed and cancelled rides. Returns how many were dropped.
    ///
    /// Only the final version of each is kept, to reject late replays.
    pub fn prune_terminal(&mut self) -> usize {
        let before = self.rides.len();
        let pruned = &mut self.pruned;
        self.rides.retain(|&ride_id, ride| {
            if ride.state.is_terminal() {
                pruned.insert(ride_id, ride.version);
                false
            } else {
                true
            }
        });
        before - self.rides.len()
    }

    /// Number of tracked rides.
    pub fn len(&self) -> usize {
        self.rides.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.rides.is_empty()
    }
}
