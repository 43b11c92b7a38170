//! Reconnect and supersession over simulated TCP.
//!
//! Events addressed to an actor whose connection is gone are queued and
//! replayed on the next join; a second join of the same actor replaces the
//! first session.

use std::time::Duration;

use ridelink_client::ClientAction;
use ridelink_core::RideRequest;
use ridelink_harness::{SimClient, SimCoordinator, SimEnv, SimServer};
use ridelink_proto::{
    Actor, CloseReason, DriverProfile, RideCommand, RideEventKind, RideState, Vehicle, VehicleType,
};
use ridelink_server::{CoordinatorConfig, RegistryConfig};

const ADDR: &str = "server:4433";

fn coordinator(seed: u64) -> SimCoordinator {
    SimServer::coordinator(
        SimEnv::with_seed(seed),
        RegistryConfig::default(),
        CoordinatorConfig::default(),
    )
}

fn serve(sim: &mut turmoil::Sim<'_>, coordinator: &SimCoordinator) {
    let coordinator = coordinator.clone();
    sim.host("server", move || {
        let coordinator = coordinator.clone();
        async move {
            SimServer::bind("0.0.0.0:4433", coordinator).await?.run().await?;
            Ok(())
        }
    });
}

fn request() -> RideRequest {
    RideRequest {
        pickup: "Church Street".into(),
        destination: "Whitefield".into(),
        fare: 640,
        vehicle_type: VehicleType::Car,
    }
}

fn profile(driver_id: u64) -> DriverProfile {
    DriverProfile {
        driver_id,
        name: format!("driver-{driver_id}"),
        vehicle: Vehicle {
            plate: format!("KA05-{driver_id:04}"),
            color: "white".into(),
            vehicle_type: VehicleType::Car,
        },
    }
}

/// Wait until the server has dropped `actor`'s session.
async fn until_offline(coordinator: &SimCoordinator, actor: Actor) {
    while coordinator.registry().lookup(actor).is_some() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn is_event(kind: RideEventKind) -> impl Fn(&ClientAction) -> bool {
    move |a| matches!(a, ClientAction::RideUpdated { event: Some(k), .. } if *k == kind)
}

#[test]
fn offline_rider_receives_accept_on_reconnect() -> turmoil::Result {
    let mut sim = turmoil::Builder::new().build();
    let coordinator = coordinator(1);
    serve(&mut sim, &coordinator);

    sim.client("actors", async move {
        let rider = SimClient::join_as(ADDR, Actor::rider(1)).await?;
        let ride = coordinator.create_ride(1, request(), &[2]).await?;

        let mut driver = SimClient::join_as(ADDR, Actor::driver(2)).await?;
        assert_eq!(driver.client().tracker().version(ride.ride_id), Some(1));

        // Rider drops off before the driver accepts
        let rider_state = rider.disconnect();
        until_offline(&coordinator, Actor::rider(1)).await;

        driver.request(ride.ride_id, RideCommand::Accept { driver: profile(2) }).await?;
        driver.until(|a| matches!(a, ClientAction::TransitionAccepted { .. })).await?;
        assert_eq!(coordinator.registry().pending(Actor::rider(1)).await, 1);

        // Replay arrives before Joined, so it is already buffered
        let mut rider = SimClient::join(ADDR, rider_state).await?;
        let update = rider.until_within(Duration::ZERO, is_event(RideEventKind::RideAccepted)).await?;
        let ClientAction::RideUpdated { ride: seen, driver: shown, .. } = update else {
            unreachable!()
        };

        assert_eq!(seen.version, 2);
        assert_eq!(seen.state, RideState::Accepted);
        assert_eq!(shown, Some(profile(2)));
        assert_eq!(coordinator.registry().pending(Actor::rider(1)).await, 0);
        Ok(())
    });

    sim.run()
}

#[test]
fn replay_preserves_order_across_several_transitions() -> turmoil::Result {
    let mut sim = turmoil::Builder::new().build();
    let coordinator = coordinator(2);
    serve(&mut sim, &coordinator);

    sim.client("actors", async move {
        let ride = coordinator.create_ride(1, request(), &[2]).await?;
        let mut driver = SimClient::join_as(ADDR, Actor::driver(2)).await?;

        driver.request(ride.ride_id, RideCommand::Accept { driver: profile(2) }).await?;
        driver.until(|a| matches!(a, ClientAction::TransitionAccepted { .. })).await?;
        driver.request(ride.ride_id, RideCommand::Arrive).await?;
        driver.until(|a| matches!(a, ClientAction::TransitionAccepted { .. })).await?;
        driver.request(ride.ride_id, RideCommand::Start).await?;
        driver.until(|a| matches!(a, ClientAction::TransitionAccepted { .. })).await?;

        // Rider was never connected: everything replays, oldest first
        let rider = SimClient::join_as(ADDR, Actor::rider(1)).await?;
        let kinds: Vec<RideEventKind> = rider
            .actions()
            .filter_map(|a| match a {
                ClientAction::RideUpdated { event: Some(kind), .. } => Some(*kind),
                _ => None,
            })
            .collect();

        assert_eq!(kinds, vec![
            RideEventKind::RideAccepted,
            RideEventKind::RideArriving,
            RideEventKind::RideStarted,
        ]);
        assert_eq!(rider.client().tracker().version(ride.ride_id), Some(4));
        Ok(())
    });

    sim.run()
}

#[test]
fn second_join_supersedes_first() -> turmoil::Result {
    let mut sim = turmoil::Builder::new().build();
    let coordinator = coordinator(3);
    serve(&mut sim, &coordinator);

    sim.client("actors", async move {
        let mut first = SimClient::join_as(ADDR, Actor::rider(1)).await?;
        let mut second = SimClient::join_as(ADDR, Actor::rider(1)).await?;

        let closed = first.until(|a| matches!(a, ClientAction::Closed { .. })).await?;
        assert_eq!(closed, ClientAction::Closed { reason: CloseReason::ReplacedByNewSession });

        let ride = coordinator.create_ride(1, request(), &[2]).await?;
        let mut driver = SimClient::join_as(ADDR, Actor::driver(2)).await?;
        driver.request(ride.ride_id, RideCommand::Accept { driver: profile(2) }).await?;

        second.until(is_event(RideEventKind::RideAccepted)).await?;
        assert_eq!(coordinator.registry().session_count(), 2);
        assert_eq!(coordinator.registry().pending(Actor::rider(1)).await, 0);
        Ok(())
    });

    sim.run()
}

#[test]
fn leave_after_supersede_keeps_new_session() -> turmoil::Result {
    let mut sim = turmoil::Builder::new().build();
    let coordinator = coordinator(4);
    serve(&mut sim, &coordinator);

    sim.client("actors", async move {
        let first = SimClient::join_as(ADDR, Actor::driver(9)).await?;
        let second = SimClient::join_as(ADDR, Actor::driver(9)).await?;
        let current = coordinator.registry().lookup(Actor::driver(9)).map(|s| s.id());

        // The old connection closing must not evict the new session
        drop(first);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(coordinator.registry().lookup(Actor::driver(9)).map(|s| s.id()), current);
        assert!(second.client().is_joined());
        Ok(())
    });

    sim.run()
}
