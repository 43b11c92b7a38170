#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use ridelink_proto::{Actor, Ride, RideId, RideState};

use super::{RideStore, StorageError, apply_mutator, sort_by_creation};

/// In-memory ride store for tests, simulation and storage-less deployments.
///
/// All state sits behind one `Arc<Mutex<..>>`, so clones share it and every
/// operation (including compare-and-swap) is atomic. A poisoned mutex is
/// recovered: each operation leaves the map consistent before it can panic.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<RideId, Ride>>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rides.
    pub fn len(&self) -> usize {
        self.rides().len()
    }

    /// Whether no rides are stored.
    pub fn is_empty(&self) -> bool {
        self.rides().is_empty()
    }

    fn rides(&self) -> MutexGuard<'_, HashMap<RideId, Ride>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn collect<P: Fn(&Ride) -> bool>(&self, predicate: P) -> Vec<Ride> {
        let mut rides: Vec<Ride> = self.rides().values().filter(|r| predicate(r)).cloned().collect();
        sort_by_creation(&mut rides);
        rides
    }
}

impl RideStore for MemoryStore {
    fn insert(&self, ride: &Ride) -> Result<(), StorageError> {
        let mut rides = self.rides();
        if rides.contains_key(&ride.ride_id) {
            return Err(StorageError::AlreadyExists(ride.ride_id));
        }
        rides.insert(ride.ride_id, ride.clone());
        Ok(())
    }

    fn load(&self, ride_id: RideId) -> Result<Ride, StorageError> {
        self.rides().get(&ride_id).cloned().ok_or(StorageError::NotFound(ride_id))
    }

    fn compare_and_swap<F>(
        &self,
        ride_id: RideId,
        expected_version: u64,
        mutator: F,
    ) -> Result<Ride, StorageError>
    where
        F: FnOnce(&Ride) -> Ride,
    {
        let mut rides = self.rides();
        let stored = rides.get_mut(&ride_id).ok_or(StorageError::NotFound(ride_id))?;

        let next = apply_mutator(stored, expected_version, mutator)?;
        *stored = next.clone();

        Ok(next)
    }

    fn active_rides(&self, actor: Actor) -> Result<Vec<Ride>, StorageError> {
        Ok(self.collect(|r| !r.state.is_terminal() && r.involves(actor)))
    }

    fn rides_in_state(&self, state: RideState) -> Result<Vec<Ride>, StorageError> {
        Ok(self.collect(|r| r.state == state))
    }
}
