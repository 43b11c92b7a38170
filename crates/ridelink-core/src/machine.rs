//! Ride lifecycle state machine.
//!
//! Pure validation: given a ride, a command, the acting party and the version
//! the caller last saw, decide whether the change is allowed and what the
//! ride looks like afterwards. The caller persists the result and then
//! delivers the [`Notification`]s. Nothing here performs I/O.
//!
//! # State Machine
//!
//! ```text
//!            accept        arrive        start        complete
//! requested ───────► accepted ─────► arriving ────► started ─────► completed
//!     │ expire           │              │              │
//!     │ cancel           │ cancel       │ cancel       │ cancel
//!     └──────────────────┴──────────────┴──────────────┴──────────► cancelled
//! ```

use ridelink_proto::{
    Actor, ActorId, CancelledBy, Ride, RideCommand, RideEvent, RideEventKind, RideState, Role,
};

use crate::error::TransitionError;

/// Reason recorded when the sweep cancels an unaccepted ride.
pub const EXPIRY_REASON: &str = "no-driver-accepted";

/// An event addressed to one actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Who receives the event
    pub recipient: Actor,
    /// Pushed payload
    pub event: RideEvent,
}

/// Outcome of an accepted command, before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Ride after the change, version already incremented
    pub ride: Ride,
    /// Event to announce
    pub event: RideEventKind,
    /// Driver assigned before the change
    pub previous_driver: Option<ActorId>,
}

impl Transition {
    /// Notifications for this transition, built from `persisted`.
    ///
    /// `persisted` is what the store actually committed; callers pass it in
    /// so a notification never describes a ride that was not written.
    pub fn notifications_for(&self, persisted: &Ride) -> Vec<Notification> {
        notifications(self.previous_driver, self.event, persisted)
    }
}

/// Validate and apply `command` issued by `actor` against `ride`.
///
/// # Errors
///
/// Checked in this order:
/// - `StaleVersion` if `expected_version` is not the ride's version
/// - `InvalidTransition` if no edge exists for the command from the current
///   state (every command on a terminal ride)
/// - `UnauthorizedActor` for the wrong role or a party not on the ride
pub fn transition(
    ride: &Ride,
    command: &RideCommand,
    actor: Actor,
    expected_version: u64,
    now_ms: u64,
) -> Result<Transition, TransitionError> {
    check_version(ride, expected_version)?;

    let (to, event) = edge(ride.state, command).ok_or(TransitionError::InvalidTransition {
        from: ride.state,
        command: command.name(),
    })?;

    if !authorized(ride, command, actor) {
        return Err(TransitionError::UnauthorizedActor { actor, command: command.name() });
    }

    let mut next = ride.clone();
    next.state = to;
    next.version = ride.version + 1;
    next.updated_at = now_ms;

    match command {
        RideCommand::Accept { driver } => {
            next.driver_id = Some(driver.driver_id);
            next.driver = Some(driver.clone());
        },
        RideCommand::Arrive => {},
        RideCommand::Start => next.started_at = Some(now_ms),
        RideCommand::Complete { final_fare } => {
            next.completed_at = Some(now_ms);
            next.final_fare = Some(final_fare.unwrap_or(ride.fare));
        },
        RideCommand::Cancel { reason } => {
            next.cancelled_by = Some(CancelledBy::from(actor.role));
            next.cancel_reason.clone_from(reason);
            next.driver_id = None;
        },
    }

    Ok(Transition { ride: next, event, previous_driver: ride.driver_id })
}

/// Cancel a `requested` ride on behalf of the system (expiry sweep).
///
/// # Errors
///
/// - `StaleVersion` if the ride moved since it was read
/// - `InvalidTransition` if the ride is no longer `requested`
pub fn expire(
    ride: &Ride,
    expected_version: u64,
    now_ms: u64,
) -> Result<Transition, TransitionError> {
    check_version(ride, expected_version)?;

    if ride.state != RideState::Requested {
        return Err(TransitionError::InvalidTransition { from: ride.state, command: "expire" });
    }

    let mut next = ride.clone();
    next.state = RideState::Cancelled;
    next.version = ride.version + 1;
    next.updated_at = now_ms;
    next.cancelled_by = Some(CancelledBy::System);
    next.cancel_reason = Some(EXPIRY_REASON.to_string());

    Ok(Transition { ride: next, event: RideEventKind::RideCancelled, previous_driver: None })
}

/// Who hears about a transition and what they are told.
///
/// Exactly one event to the rider; exactly one to the driver assigned
/// before or after the change, if any. On accept the rider also gets the
/// driver's profile and the driver gets the trip detail.
pub fn notifications(
    previous_driver: Option<ActorId>,
    event: RideEventKind,
    ride: &Ride,
) -> Vec<Notification> {
    let accepted = event == RideEventKind::RideAccepted;

    let mut out = vec![Notification {
        recipient: ride.rider(),
        event: RideEvent {
            event,
            ride: ride.clone(),
            driver: if accepted { ride.driver.clone() } else { None },
            trip: None,
        },
    }];

    if let Some(driver_id) = previous_driver.or(ride.driver_id) {
        out.push(Notification {
            recipient: Actor::driver(driver_id),
            event: RideEvent {
                event,
                ride: ride.clone(),
                driver: None,
                trip: if accepted { Some(ride.trip()) } else { None },
            },
        });
    }

    out
}

/// `ride-requested` offers for candidate drivers of a new ride.
pub fn offers(ride: &Ride, candidates: &[ActorId]) -> Vec<Notification> {
    let mut seen = Vec::with_capacity(candidates.len());
    candidates
        .iter()
        .filter(|id| {
            if seen.contains(*id) {
                return false;
            }
            seen.push(**id);
            true
        })
        .map(|&driver_id| Notification {
            recipient: Actor::driver(driver_id),
            event: RideEvent {
                event: RideEventKind::RideRequested,
                ride: ride.clone(),
                driver: None,
                trip: Some(ride.trip()),
            },
        })
        .collect()
}

/// `driver_id` is present exactly in the states that have a driver.
pub fn assignment_is_consistent(ride: &Ride) -> bool {
    ride.driver_id.is_some() == ride.state.has_driver()
}

fn check_version(ride: &Ride, expected_version: u64) -> Result<(), TransitionError> {
    if ride.version == expected_version {
        Ok(())
    } else {
        Err(TransitionError::StaleVersion { expected: expected_version, actual: ride.version })
    }
}

fn edge(from: RideState, command: &RideCommand) -> Option<(RideState, RideEventKind)> {
    match (from, command) {
        (RideState::Requested, RideCommand::Accept { .. }) => {
            Some((RideState::Accepted, RideEventKind::RideAccepted))
        },
        (RideState::Accepted, RideCommand::Arrive) => {
            Some((RideState::Arriving, RideEventKind::RideArriving))
        },
        (RideState::Arriving, RideCommand::Start) => {
            Some((RideState::Started, RideEventKind::RideStarted))
        },
        (RideState::Started, RideCommand::Complete { .. }) => {
            Some((RideState::Completed, RideEventKind::RideCompleted))
        },
        (state, RideCommand::Cancel { .. }) if !state.is_terminal() => {
            Some((RideState::Cancelled, RideEventKind::RideCancelled))
        },
        _ => None,
    }
}

fn authorized(ride: &Ride, command: &RideCommand, actor: Actor) -> bool {
    match command {
        RideCommand::Accept { driver } => {
            actor.role == Role::Driver && driver.driver_id == actor.id
        },
        RideCommand::Arrive | RideCommand::Start | RideCommand::Complete { .. } => {
            actor.role == Role::Driver && ride.involves(actor)
        },
        RideCommand::Cancel { .. } => ride.involves(actor),
    }
}
