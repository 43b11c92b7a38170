//! Fuzz target for the ride state machine
//!
//! Drives one ride through arbitrary command sequences from arbitrary actors
//! with arbitrary expected versions.
//!
//! # Invariants
//!
//! - A rejected command leaves the ride untouched
//! - An accepted command bumps the version by exactly one
//! - `driver_id` is set exactly in the states that have a driver
//! - Nothing leaves a terminal state
//! - Notifications go to the rider once and to at most one driver once
//! - NEVER panic

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ridelink_core::{
    RideRequest,
    machine::{self, assignment_is_consistent},
    ride::new_ride,
};
use ridelink_proto::{Actor, DriverProfile, RideCommand, Role, Vehicle, VehicleType};

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    fare: u16,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, Arbitrary)]
struct Step {
    command: Command,
    actor_id: u8,
    driver_role: bool,
    /// Offset from the current version; 0 means up to date
    version_skew: i8,
    expire: bool,
}

#[derive(Debug, Clone, Arbitrary)]
enum Command {
    Accept { driver_id: u8 },
    Arrive,
    Start,
    Complete { final_fare: Option<u16> },
    Cancel,
}

fn command(c: &Command) -> RideCommand {
    match c {
        Command::Accept { driver_id } => RideCommand::Accept {
            driver: DriverProfile {
                driver_id: u64::from(*driver_id % 4),
                name: "fuzz".into(),
                vehicle: Vehicle {
                    plate: "FZ-0000".into(),
                    color: "grey".into(),
                    vehicle_type: VehicleType::Car,
                },
            },
        },
        Command::Arrive => RideCommand::Arrive,
        Command::Start => RideCommand::Start,
        Command::Complete { final_fare } => {
            RideCommand::Complete { final_fare: final_fare.map(u64::from) }
        },
        Command::Cancel => RideCommand::Cancel { reason: None },
    }
}

fuzz_target!(|scenario: Scenario| {
    let request = RideRequest {
        pickup: "A".into(),
        destination: "B".into(),
        fare: u64::from(scenario.fare).max(1),
        vehicle_type: VehicleType::Car,
    };
    let Ok(mut ride) = new_ride(1, 0, request, 0) else {
        return;
    };

    for (now, step) in scenario.steps.iter().enumerate() {
        let now = now as u64 + 1;
        let expected = ride.version.saturating_add_signed(i64::from(step.version_skew));
        let before = ride.clone();

        let result = if step.expire {
            machine::expire(&ride, expected, now)
        } else {
            let role = if step.driver_role { Role::Driver } else { Role::Rider };
            let actor = Actor { id: u64::from(step.actor_id % 4), role };
            machine::transition(&ride, &command(&step.command), actor, expected, now)
        };

        match result {
            Ok(transition) => {
                assert!(!before.state.is_terminal(), "left terminal state {}", before.state);
                assert_eq!(transition.ride.version, before.version + 1);
                assert!(assignment_is_consistent(&transition.ride));

                let notes = transition.notifications_for(&transition.ride);
                let riders = notes.iter().filter(|n| n.recipient.role == Role::Rider).count();
                let drivers = notes.iter().filter(|n| n.recipient.role == Role::Driver).count();
                assert_eq!(riders, 1);
                assert!(drivers <= 1);

                ride = transition.ride;
            },
            Err(_) => assert_eq!(ride, before),
        }
    }
});
