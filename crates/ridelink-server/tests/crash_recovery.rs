//! Crash recovery tests for `RedbStore`.
//!
//! Rides written before the database is dropped must be readable, and
//! writable at the right version, after it is reopened.

use ridelink_core::{RideRequest, env::test_utils::MockEnv};
use ridelink_proto::{Actor, DriverProfile, RideCommand, RideState, Vehicle, VehicleType};
use ridelink_server::{
    ConnectionRegistry, CoordinationError, CoordinationService, CoordinatorConfig, RedbStore,
    RideStore,
};
use tempfile::tempdir;

fn coordinator(store: RedbStore) -> CoordinationService<MockEnv, RedbStore> {
    CoordinationService::new(
        MockEnv::default(),
        store,
        ConnectionRegistry::default(),
        CoordinatorConfig::default(),
    )
}

fn request(n: u64) -> RideRequest {
    RideRequest {
        pickup: format!("{n} Market Street"),
        destination: "Lakeside Park".into(),
        fare: 500 + n,
        vehicle_type: VehicleType::Auto,
    }
}

fn accept(driver_id: u64) -> RideCommand {
    RideCommand::Accept {
        driver: DriverProfile {
            driver_id,
            name: "Meera".into(),
            vehicle: Vehicle {
                plate: "DL3C0001".into(),
                color: "yellow".into(),
                vehicle_type: VehicleType::Auto,
            },
        },
    }
}

#[tokio::test]
async fn rides_survive_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("rides.redb");

    let created = {
        let service = coordinator(RedbStore::open(&db_path).unwrap());
        let mut created = Vec::new();
        for n in 0..5 {
            created.push(service.create_ride(10, request(n), &[]).await.unwrap());
        }
        created
    };

    let store = RedbStore::open(&db_path).unwrap();
    for ride in &created {
        assert_eq!(&store.load(ride.ride_id).unwrap(), ride);
    }
    assert_eq!(store.rides_in_state(RideState::Requested).unwrap().len(), 5);
}

#[tokio::test]
async fn versions_continue_after_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("rides.redb");

    let ride_id = {
        let service = coordinator(RedbStore::open(&db_path).unwrap());
        let ride = service.create_ride(10, request(1), &[]).await.unwrap();
        service.request_transition(ride.ride_id, accept(3), Actor::driver(3), 1).await.unwrap();
        ride.ride_id
    };

    let service = coordinator(RedbStore::open(&db_path).unwrap());

    // A client that still holds version 1 is told it is stale
    let err = service
        .request_transition(ride_id, accept(4), Actor::driver(4), 1)
        .await
        .unwrap_err();
    assert_eq!(err, CoordinationError::StaleVersion { expected: 1, actual: 2 });

    let arriving = service
        .request_transition(ride_id, RideCommand::Arrive, Actor::driver(3), 2)
        .await
        .unwrap();
    assert_eq!(arriving.version, 3);
    assert_eq!(arriving.driver_id, Some(3));
}

#[tokio::test]
async fn snapshot_after_restart_lists_active_rides() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("rides.redb");

    {
        let service = coordinator(RedbStore::open(&db_path).unwrap());
        let kept = service.create_ride(10, request(1), &[]).await.unwrap();
        let cancelled = service.create_ride(10, request(2), &[]).await.unwrap();
        service.request_transition(kept.ride_id, accept(3), Actor::driver(3), 1).await.unwrap();
        service
            .request_transition(
                cancelled.ride_id,
                RideCommand::Cancel { reason: None },
                Actor::rider(10),
                1,
            )
            .await
            .unwrap();
    }

    let service = coordinator(RedbStore::open(&db_path).unwrap());
    assert_eq!(service.snapshot(Actor::rider(10)).unwrap().len(), 1);
    assert_eq!(service.snapshot(Actor::driver(3)).unwrap().len(), 1);
    assert!(service.snapshot(Actor::driver(4)).unwrap().is_empty());
}

#[tokio::test]
async fn indexes_survive_restart_without_terminal_rides() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("rides.redb");

    let (open, finished) = {
        let service = coordinator(RedbStore::open(&db_path).unwrap());
        let open = service.create_ride(10, request(1), &[]).await.unwrap();
        let finished = service.create_ride(10, request(2), &[]).await.unwrap();
        service.request_transition(open.ride_id, accept(3), Actor::driver(3), 1).await.unwrap();

        service.request_transition(finished.ride_id, accept(3), Actor::driver(3), 1).await.unwrap();
        let trip = [
            (RideCommand::Arrive, 2),
            (RideCommand::Start, 3),
            (RideCommand::Complete { final_fare: None }, 4),
        ];
        for (command, version) in trip {
            service
                .request_transition(finished.ride_id, command, Actor::driver(3), version)
                .await
                .unwrap();
        }
        (open, finished)
    };

    let store = RedbStore::open(&db_path).unwrap();

    let active: Vec<_> =
        store.active_rides(Actor::driver(3)).unwrap().iter().map(|r| r.ride_id).collect();
    assert_eq!(active, vec![open.ride_id]);
    let active: Vec<_> =
        store.active_rides(Actor::rider(10)).unwrap().iter().map(|r| r.ride_id).collect();
    assert_eq!(active, vec![open.ride_id]);

    assert!(store.rides_in_state(RideState::Requested).unwrap().is_empty());
    assert_eq!(store.rides_in_state(RideState::Accepted).unwrap().len(), 1);
    let completed = store.rides_in_state(RideState::Completed).unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].ride_id, finished.ride_id);
    assert_eq!(completed[0].version, 5);
}
