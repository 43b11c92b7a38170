//! Redb-backed durable ride store.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. A
//! compare-and-swap reads, checks and writes inside one write transaction, and
//! redb allows a single writer at a time, so the check cannot be raced.
//!
//! Two index tables are written in the same transaction as the ride row, so
//! the join snapshot and the expiry sweep read a key range instead of every
//! ride ever stored.

use std::{path::Path, sync::Arc};

use redb::{Database, ReadableTable, Table, TableDefinition};
use ridelink_proto::{Actor, Ride, RideId, RideState, Role};

use super::{RideStore, StorageError, apply_mutator};

/// Table: rides
/// Key: `ride_id` as big-endian bytes [16 bytes]
/// Value: CBOR-encoded Ride
const RIDES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("rides");

/// Table: rides_by_state
/// Key: (state: u8, created_at: u64, ride_id: u128) as big-endian bytes [25 bytes]
/// Value: empty
const BY_STATE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("rides_by_state");

/// Table: active_by_actor
/// Key: (role: u8, actor_id: u64, created_at: u64, ride_id: u128) as
/// big-endian bytes [33 bytes]
/// Value: empty
///
/// Only non-terminal rides have entries.
const BY_ACTOR: TableDefinition<&[u8], &[u8]> = TableDefinition::new("active_by_actor");

const EMPTY: &[u8] = &[];
const STATE_KEY_LEN: usize = 25;
const ACTOR_KEY_LEN: usize = 33;

/// Durable store backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist (RIDES, BY_STATE, BY_ACTOR).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(RIDES).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(BY_STATE).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(BY_ACTOR).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Load the rides whose index keys fall in `start..=end`.
    ///
    /// Index keys end with `created_at` then `ride_id`, so the result is in
    /// creation order.
    fn load_indexed(
        &self,
        index: TableDefinition<'static, &'static [u8], &'static [u8]>,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<Ride>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let index = txn.open_table(index).map_err(|e| StorageError::Io(e.to_string()))?;
        let rides = txn.open_table(RIDES).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut result = Vec::new();
        for entry in index.range(start..=end).map_err(|e| StorageError::Io(e.to_string()))? {
            let (key, _) = entry.map_err(|e| StorageError::Io(e.to_string()))?;
            let ride_key = ride_key_suffix(key.value())?;

            let value = rides
                .get(ride_key.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
                .ok_or_else(|| StorageError::Io("index entry without ride".into()))?;
            result.push(decode_ride(value.value())?);
        }

        Ok(result)
    }
}

impl RideStore for RedbStore {
    fn insert(&self, ride: &Ride) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table = txn.open_table(RIDES).map_err(|e| StorageError::Io(e.to_string()))?;
            let key = encode_ride_key(ride.ride_id);

            let exists =
                table.get(key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?.is_some();
            if exists {
                return Err(StorageError::AlreadyExists(ride.ride_id));
            }

            let bytes = encode_ride(ride)?;
            table
                .insert(key.as_slice(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;

            let mut by_state =
                txn.open_table(BY_STATE).map_err(|e| StorageError::Io(e.to_string()))?;
            let mut by_actor =
                txn.open_table(BY_ACTOR).map_err(|e| StorageError::Io(e.to_string()))?;
            add_index_entries(&mut by_state, &mut by_actor, ride)?;
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    fn load(&self, ride_id: RideId) -> Result<Ride, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(RIDES).map_err(|e| StorageError::Io(e.to_string()))?;

        let key = encode_ride_key(ride_id);
        let value = table
            .get(key.as_slice())
            .map_err(|e| StorageError::Io(e.to_string()))?
            .ok_or(StorageError::NotFound(ride_id))?;

        decode_ride(value.value())
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
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let next = {
            let mut table = txn.open_table(RIDES).map_err(|e| StorageError::Io(e.to_string()))?;
            let key = encode_ride_key(ride_id);

            let stored = {
                let value = table
                    .get(key.as_slice())
                    .map_err(|e| StorageError::Io(e.to_string()))?
                    .ok_or(StorageError::NotFound(ride_id))?;
                decode_ride(value.value())?
            };

            // Dropping the uncommitted transaction on error aborts it
            let next = apply_mutator(&stored, expected_version, mutator)?;

            let bytes = encode_ride(&next)?;
            table
                .insert(key.as_slice(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;

            let mut by_state =
                txn.open_table(BY_STATE).map_err(|e| StorageError::Io(e.to_string()))?;
            let mut by_actor =
                txn.open_table(BY_ACTOR).map_err(|e| StorageError::Io(e.to_string()))?;
            remove_index_entries(&mut by_state, &mut by_actor, &stored)?;
            add_index_entries(&mut by_state, &mut by_actor, &next)?;
            next
        };

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(next)
    }

    fn active_rides(&self, actor: Actor) -> Result<Vec<Ride>, StorageError> {
        let mut start = [0u8; ACTOR_KEY_LEN];
        let mut end = [0xFFu8; ACTOR_KEY_LEN];
        start[..9].copy_from_slice(&actor_prefix(actor));
        end[..9].copy_from_slice(&actor_prefix(actor));

        self.load_indexed(BY_ACTOR, &start, &end)
    }

    fn rides_in_state(&self, state: RideState) -> Result<Vec<Ride>, StorageError> {
        let mut start = [0u8; STATE_KEY_LEN];
        let mut end = [0xFFu8; STATE_KEY_LEN];
        start[0] = state_tag(state);
        end[0] = state_tag(state);

        self.load_indexed(BY_STATE, &start, &end)
    }
}

type IndexTable<'txn> = Table<'txn, &'static [u8], &'static [u8]>;

fn add_index_entries(
    by_state: &mut IndexTable<'_>,
    by_actor: &mut IndexTable<'_>,
    ride: &Ride,
) -> Result<(), StorageError> {
    by_state
        .insert(encode_state_key(ride).as_slice(), EMPTY)
        .map_err(|e| StorageError::Io(e.to_string()))?;
    for key in actor_keys(ride) {
        by_actor.insert(key.as_slice(), EMPTY).map_err(|e| StorageError::Io(e.to_string()))?;
    }
    Ok(())
}

fn remove_index_entries(
    by_state: &mut IndexTable<'_>,
    by_actor: &mut IndexTable<'_>,
    ride: &Ride,
) -> Result<(), StorageError> {
    by_state
        .remove(encode_state_key(ride).as_slice())
        .map_err(|e| StorageError::Io(e.to_string()))?;
    for key in actor_keys(ride) {
        by_actor.remove(key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;
    }
    Ok(())
}

/// Actor index keys for a ride: none once terminal, otherwise the rider and
/// the assigned driver if any.
fn actor_keys(ride: &Ride) -> Vec<[u8; ACTOR_KEY_LEN]> {
    if ride.state.is_terminal() {
        return Vec::new();
    }

    let mut actors = vec![ride.rider()];
    actors.extend(ride.driver_id.map(Actor::driver));

    actors
        .into_iter()
        .map(|actor| {
            let mut key = [0u8; ACTOR_KEY_LEN];
            key[..9].copy_from_slice(&actor_prefix(actor));
            key[9..17].copy_from_slice(&ride.created_at.to_be_bytes());
            key[17..].copy_from_slice(&encode_ride_key(ride.ride_id));
            key
        })
        .collect()
}

fn encode_state_key(ride: &Ride) -> [u8; STATE_KEY_LEN] {
    let mut key = [0u8; STATE_KEY_LEN];
    key[0] = state_tag(ride.state);
    key[1..9].copy_from_slice(&ride.created_at.to_be_bytes());
    key[9..].copy_from_slice(&encode_ride_key(ride.ride_id));
    key
}

fn actor_prefix(actor: Actor) -> [u8; 9] {
    let mut prefix = [0u8; 9];
    prefix[0] = match actor.role {
        Role::Rider => 0,
        Role::Driver => 1,
    };
    prefix[1..].copy_from_slice(&actor.id.to_be_bytes());
    prefix
}

const fn state_tag(state: RideState) -> u8 {
    match state {
        RideState::Requested => 0,
        RideState::Accepted => 1,
        RideState::Arriving => 2,
        RideState::Started => 3,
        RideState::Completed => 4,
        RideState::Cancelled => 5,
    }
}

/// Both index key layouts end with the 16-byte ride key.
fn ride_key_suffix(index_key: &[u8]) -> Result<[u8; 16], StorageError> {
    index_key
        .len()
        .checked_sub(16)
        .and_then(|at| index_key.get(at..))
        .and_then(|suffix| suffix.try_into().ok())
        .ok_or_else(|| StorageError::Io(format!("malformed index key of {} bytes", index_key.len())))
}

fn encode_ride_key(ride_id: RideId) -> [u8; 16] {
    ride_id.to_be_bytes()
}

fn encode_ride(ride: &Ride) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(ride, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode_ride(bytes: &[u8]) -> Result<Ride, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use ridelink_proto::VehicleType;
    use tempfile::TempDir;

    use super::*;

    fn ride(ride_id: RideId) -> Ride {
        Ride {
            ride_id,
            rider_id: 10,
            driver_id: None,
            driver: None,
            state: RideState::Requested,
            pickup: "Old Town Square".into(),
            destination: "River Port".into(),
            fare: 700,
            vehicle_type: VehicleType::Car,
            created_at: 1,
            updated_at: 1,
            started_at: None,
            completed_at: None,
            final_fare: None,
            cancelled_by: None,
            cancel_reason: None,
            version: 1,
        }
    }

    fn open() -> (TempDir, RedbStore) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(dir.path().join("rides.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn insert_load_and_duplicate() {
        let (_dir, store) = open();
        let id = u128::MAX - 3;
        store.insert(&ride(id)).unwrap();

        assert_eq!(store.load(id).unwrap(), ride(id));
        assert_eq!(store.insert(&ride(id)), Err(StorageError::AlreadyExists(id)));
        assert_eq!(store.load(1), Err(StorageError::NotFound(1)));
    }

    #[test]
    fn cas_is_atomic_with_version_check() {
        let (_dir, store) = open();
        store.insert(&ride(1)).unwrap();

        let next = store
            .compare_and_swap(1, 1, |r| {
                let mut r = r.clone();
                r.state = RideState::Cancelled;
                r
            })
            .unwrap();
        assert_eq!(next.version, 2);

        assert_eq!(
            store.compare_and_swap(1, 1, Clone::clone),
            Err(StorageError::StaleVersion { expected: 1, actual: 2 })
        );
        assert_eq!(store.load(1).unwrap().state, RideState::Cancelled);
    }

    #[test]
    fn indexes_follow_state_changes() {
        let (_dir, store) = open();
        store.insert(&ride(1)).unwrap();
        store.insert(&ride(2)).unwrap();
        store
            .compare_and_swap(2, 1, |r| {
                let mut r = r.clone();
                r.state = RideState::Accepted;
                r.driver_id = Some(7);
                r
            })
            .unwrap();

        assert_eq!(store.rides_in_state(RideState::Requested).unwrap().len(), 1);
        assert_eq!(store.rides_in_state(RideState::Accepted).unwrap()[0].ride_id, 2);
        assert_eq!(store.active_rides(Actor::rider(10)).unwrap().len(), 2);
        assert_eq!(store.active_rides(Actor::driver(7)).unwrap()[0].ride_id, 2);
        assert!(store.active_rides(Actor::rider(7)).unwrap().is_empty());

        store
            .compare_and_swap(2, 2, |r| {
                let mut r = r.clone();
                r.state = RideState::Cancelled;
                r
            })
            .unwrap();

        assert!(store.rides_in_state(RideState::Accepted).unwrap().is_empty());
        assert_eq!(store.rides_in_state(RideState::Cancelled).unwrap().len(), 1);
        assert!(store.active_rides(Actor::driver(7)).unwrap().is_empty());
        assert_eq!(store.active_rides(Actor::rider(10)).unwrap().len(), 1);
    }

    #[test]
    fn indexed_reads_are_in_creation_order() {
        let (_dir, store) = open();
        for (ride_id, created_at) in [(9, 30), (3, 10), (5, 20)] {
            let mut r = ride(ride_id);
            r.created_at = created_at;
            store.insert(&r).unwrap();
        }

        let ids: Vec<RideId> =
            store.rides_in_state(RideState::Requested).unwrap().iter().map(|r| r.ride_id).collect();
        assert_eq!(ids, vec![3, 5, 9]);

        let ids: Vec<RideId> =
            store.active_rides(Actor::rider(10)).unwrap().iter().map(|r| r.ride_id).collect();
        assert_eq!(ids, vec![3, 5, 9]);
    }

    #[test]
    fn failed_cas_leaves_indexes_untouched() {
        let (_dir, store) = open();
        store.insert(&ride(1)).unwrap();

        let err = store.compare_and_swap(1, 4, |r| {
            let mut r = r.clone();
            r.state = RideState::Cancelled;
            r
        });
        assert!(err.is_err());
        assert_eq!(store.rides_in_state(RideState::Requested).unwrap().len(), 1);
        assert!(store.rides_in_state(RideState::Cancelled).unwrap().is_empty());
    }
}
