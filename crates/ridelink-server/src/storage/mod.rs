//! Ride storage.
//!
//! Trait-based abstraction over the durable ride record. The trait is
//! synchronous: every operation is a short critical section (a mutex or a
//! single redb transaction), and the coordinator never holds anything across
//! it.
//!
//! Concurrent writers are serialized by [`RideStore::compare_and_swap`], not by
//! locks held across I/O: two writers reading version `n` race, one commits
//! `n + 1`, the other gets [`StorageError::StaleVersion`].

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStore;
pub use error::StorageError;
pub use memory::MemoryStore;
use ridelink_proto::{Actor, Ride, RideId, RideState};

pub use self::redb::RedbStore;

/// Durable ride record.
///
/// Must be Clone (shared by the coordinator and sweeper), Send + Sync, and
/// synchronous. Clones share the same underlying data.
pub trait RideStore: Clone + Send + Sync + 'static {
    /// Persist a new ride.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` if a ride with this id is stored
    fn insert(&self, ride: &Ride) -> Result<(), StorageError>;

    /// Load a ride.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no ride has this id
    fn load(&self, ride_id: RideId) -> Result<Ride, StorageError>;

    /// Replace a ride only if its stored version is `expected_version`.
    ///
    /// `mutator` sees the stored ride and returns the replacement. Whatever it
    /// returns, the committed ride keeps `ride_id` and has version
    /// `expected_version + 1`. The committed ride is returned.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no ride has this id
    /// - `StaleVersion` if the stored version differs; nothing is written
    fn compare_and_swap<F>(
        &self,
        ride_id: RideId,
        expected_version: u64,
        mutator: F,
    ) -> Result<Ride, StorageError>
    where
        F: FnOnce(&Ride) -> Ride;

    /// Non-terminal rides where `actor` is the rider or the assigned driver.
    ///
    /// Ordered by creation time.
    fn active_rides(&self, actor: Actor) -> Result<Vec<Ride>, StorageError>;

    /// All rides currently in `state`, ordered by creation time.
    fn rides_in_state(&self, state: RideState) -> Result<Vec<Ride>, StorageError>;
}

/// Apply a CAS mutator and pin the fields the store owns.
fn apply_mutator<F>(stored: &Ride, expected_version: u64, mutator: F) -> Result<Ride, StorageError>
where
    F: FnOnce(&Ride) -> Ride,
{
    if stored.version != expected_version {
        return Err(StorageError::StaleVersion {
            expected: expected_version,
            actual: stored.version,
        });
    }

    let mut next = mutator(stored);
    next.ride_id = stored.ride_id;
    next.version = expected_version + 1;
    Ok(next)
}

fn sort_by_creation(rides: &mut [Ride]) {
    rides.sort_by_key(|r| (r.created_at, r.ride_id));
}
