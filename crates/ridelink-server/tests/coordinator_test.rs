//! End-to-end coordinator scenarios over the in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use ridelink_core::{RideRequest, env::test_utils::MockEnv};
use ridelink_proto::{
    Actor, CancelledBy, CloseReason, DriverProfile, Payload, RideCommand, RideEvent,
    RideEventKind, RideState, Vehicle, VehicleType,
};
use ridelink_server::{
    ConnectionRegistry, CoordinationError, CoordinationService, CoordinatorConfig, DeliveryError,
    MemoryStore, Session, SessionTransport,
};
use tokio::sync::Mutex;

type Service = CoordinationService<MockEnv, MemoryStore>;

/// Session transport that keeps every pushed ride event.
#[derive(Default)]
struct Inbox {
    events: Mutex<Vec<RideEvent>>,
}

impl Inbox {
    async fn events(&self) -> Vec<RideEvent> {
        self.events.lock().await.clone()
    }

    async fn kinds(&self) -> Vec<(RideEventKind, u64)> {
        self.events().await.iter().map(|e| (e.event, e.version())).collect()
    }
}

#[async_trait]
impl SessionTransport for Inbox {
    async fn send(&self, payload: Payload) -> Result<(), DeliveryError> {
        if let Payload::RideEvent(event) = payload {
            self.events.lock().await.push(event);
        }
        Ok(())
    }

    fn close(&self, _reason: CloseReason) {}
}

fn service() -> Service {
    CoordinationService::new(
        MockEnv::default(),
        MemoryStore::new(),
        ConnectionRegistry::default(),
        CoordinatorConfig::default(),
    )
}

async fn connect(service: &Service, actor: Actor) -> Arc<Inbox> {
    let inbox = Arc::new(Inbox::default());
    service.join(Session::new(service.new_session_id(), actor, 0, inbox.clone())).await;
    inbox
}

fn request() -> RideRequest {
    RideRequest {
        pickup: "12 Baker Street".into(),
        destination: "Kings Cross".into(),
        fare: 1_100,
        vehicle_type: VehicleType::Car,
    }
}

fn profile(driver_id: u64) -> DriverProfile {
    DriverProfile {
        driver_id,
        name: format!("driver-{driver_id}"),
        vehicle: Vehicle {
            plate: format!("PLATE{driver_id}"),
            color: "black".into(),
            vehicle_type: VehicleType::Car,
        },
    }
}

fn accept(driver_id: u64) -> RideCommand {
    RideCommand::Accept { driver: profile(driver_id) }
}

const RIDER: Actor = Actor::rider(100);
const D1: Actor = Actor::driver(1);
const D2: Actor = Actor::driver(2);

#[tokio::test]
async fn second_accept_with_old_version_is_stale() {
    let service = service();
    let rider = connect(&service, RIDER).await;
    let d2 = connect(&service, D2).await;
    let ride = service.create_ride(RIDER.id, request(), &[]).await.unwrap();

    let accepted = service.request_transition(ride.ride_id, accept(1), D1, 1).await.unwrap();
    assert_eq!((accepted.state, accepted.version), (RideState::Accepted, 2));

    let events = rider.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, RideEventKind::RideAccepted);
    assert_eq!(events[0].ride_id(), ride.ride_id);
    assert_eq!(events[0].version(), 2);
    assert_eq!(events[0].driver.as_ref().map(|d| d.driver_id), Some(1));

    let err = service.request_transition(ride.ride_id, accept(2), D2, 1).await.unwrap_err();
    assert_eq!(err, CoordinationError::StaleVersion { expected: 1, actual: 2 });

    assert_eq!(service.ride(ride.ride_id).unwrap(), accepted);
    assert_eq!(rider.events().await.len(), 1);
    assert!(d2.events().await.is_empty());
}

#[tokio::test]
async fn cancel_while_arriving_then_start_is_invalid() {
    let service = service();
    let rider = connect(&service, RIDER).await;
    let driver = connect(&service, D1).await;
    let ride = service.create_ride(RIDER.id, request(), &[]).await.unwrap();

    service.request_transition(ride.ride_id, accept(1), D1, 1).await.unwrap();
    service.request_transition(ride.ride_id, RideCommand::Arrive, D1, 2).await.unwrap();
    let cancelled = service
        .request_transition(
            ride.ride_id,
            RideCommand::Cancel { reason: Some("took too long".into()) },
            RIDER,
            3,
        )
        .await
        .unwrap();

    assert_eq!(cancelled.state, RideState::Cancelled);
    assert_eq!(cancelled.cancelled_by, Some(CancelledBy::Rider));
    assert_eq!(cancelled.driver_id, None);
    assert_eq!(rider.kinds().await.last(), Some(&(RideEventKind::RideCancelled, 4)));
    assert_eq!(driver.kinds().await.last(), Some(&(RideEventKind::RideCancelled, 4)));

    let err = service.request_transition(ride.ride_id, RideCommand::Start, D1, 4).await.unwrap_err();
    assert_eq!(
        err,
        CoordinationError::InvalidTransition { from: RideState::Cancelled, command: "start" }
    );
    assert_eq!(err.http_status(), 400);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_have_one_winner() {
    for _ in 0..20 {
        let service = service();
        let ride = service.create_ride(RIDER.id, request(), &[]).await.unwrap();

        let attempts: Vec<_> = (1..=8)
            .map(|driver_id| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .request_transition(ride.ride_id, accept(driver_id), Actor::driver(driver_id), 1)
                        .await
                })
            })
            .collect();

        let mut winners = Vec::new();
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(ride) => winners.push(ride),
                Err(e) => assert_eq!(e, CoordinationError::StaleVersion { expected: 1, actual: 2 }),
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(service.ride(ride.ride_id).unwrap(), winners[0]);
    }
}

#[tokio::test]
async fn reconnecting_rider_catches_up_in_order() {
    let service = service();
    let ride = service.create_ride(RIDER.id, request(), &[]).await.unwrap();
    let driver = connect(&service, D1).await;

    service.request_transition(ride.ride_id, accept(1), D1, 1).await.unwrap();
    service.request_transition(ride.ride_id, RideCommand::Arrive, D1, 2).await.unwrap();
    assert_eq!(service.registry().pending(RIDER).await, 2);

    let rider = connect(&service, RIDER).await;
    assert_eq!(
        rider.kinds().await,
        vec![(RideEventKind::RideAccepted, 2), (RideEventKind::RideArriving, 3)]
    );
    assert_eq!(service.registry().pending(RIDER).await, 0);

    service.request_transition(ride.ride_id, RideCommand::Start, D1, 3).await.unwrap();
    assert_eq!(rider.kinds().await.last(), Some(&(RideEventKind::RideStarted, 4)));
    assert_eq!(driver.kinds().await.len(), 3);
}

#[tokio::test]
async fn completion_defaults_to_quoted_fare() {
    let service = service();
    let ride = service.create_ride(RIDER.id, request(), &[]).await.unwrap();

    service.request_transition(ride.ride_id, accept(1), D1, 1).await.unwrap();
    service.request_transition(ride.ride_id, RideCommand::Arrive, D1, 2).await.unwrap();
    service.request_transition(ride.ride_id, RideCommand::Start, D1, 3).await.unwrap();
    let done = service
        .request_transition(ride.ride_id, RideCommand::Complete { final_fare: None }, D1, 4)
        .await
        .unwrap();

    assert_eq!(done.state, RideState::Completed);
    assert_eq!(done.final_fare, Some(1_100));
    assert_eq!(done.driver_id, Some(1));
    assert!(service.snapshot(RIDER).unwrap().is_empty());
}

#[tokio::test]
async fn other_driver_cannot_drive_assigned_ride() {
    let service = service();
    let ride = service.create_ride(RIDER.id, request(), &[]).await.unwrap();
    service.request_transition(ride.ride_id, accept(1), D1, 1).await.unwrap();

    let err = service.request_transition(ride.ride_id, RideCommand::Arrive, D2, 2).await.unwrap_err();

    assert_eq!(err, CoordinationError::UnauthorizedActor { actor: D2, command: "arrive" });
    assert_eq!(err.http_status(), 403);
    assert_eq!(service.ride(ride.ride_id).unwrap().version, 2);
}
