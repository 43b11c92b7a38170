//! Rider/driver client state machine.

use std::collections::HashMap;

use ridelink_proto::{
    Actor, CloseReason, Frame, Payload, RideCommand, RideId, SessionId,
    payloads::{
        ride::{RideEvent, TransitionRequest},
        session::{Goodbye, Join, Joined},
    },
};

use crate::{
    error::ClientError,
    event::{ClientAction, ClientEvent},
    tracker::RideTracker,
};

/// Where the client is in the session handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection, or the last one ended.
    Disconnected,
    /// `Join` sent, waiting for `Joined`.
    Joining {
        /// Request id of the `Join` frame
        request_id: u32,
    },
    /// Server acknowledged the join and replayed what was queued.
    Joined {
        /// Server-assigned session id
        session_id: SessionId,
    },
}

/// Action-based client for one actor.
///
/// Ride state survives disconnects: after a reconnect the server replays
/// what was missed and the tracker drops anything already seen.
#[derive(Debug)]
pub struct Client {
    actor: Actor,
    tracker: RideTracker,
    state: SessionState,
    next_request_id: u32,
    in_flight: HashMap<u32, RideId>,
}

impl Client {
    /// Create a disconnected client for `actor`.
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            tracker: RideTracker::new(),
            state: SessionState::Disconnected,
            next_request_id: 1,
            in_flight: HashMap::new(),
        }
    }

    /// Actor this client speaks for.
    pub fn actor(&self) -> Actor {
        self.actor
    }

    /// Current handshake state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session is joined.
    pub fn is_joined(&self) -> bool {
        matches!(self.state, SessionState::Joined { .. })
    }

    /// Rides known to this client.
    pub fn tracker(&self) -> &RideTracker {
        &self.tracker
    }

    /// Transition requests still waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Process an event and return actions to execute.
    pub fn handle(&mut self, event: ClientEvent) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::FrameReceived(frame) => self.handle_frame(&frame),
            ClientEvent::Connect => self.handle_connect(),
            ClientEvent::Disconnected => {
                self.reset();
                Ok(vec![])
            },
            ClientEvent::RequestTransition { ride_id, command } => {
                self.handle_request_transition(ride_id, command)
            },
            ClientEvent::Ping => {
                let request_id = self.next_request_id();
                Ok(vec![ClientAction::Send(Payload::Ping.to_frame(request_id)?)])
            },
            ClientEvent::Leave => self.handle_leave(),
        }
    }

    fn handle_connect(&mut self) -> Result<Vec<ClientAction>, ClientError> {
        if self.state != SessionState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }

        let request_id = self.next_request_id();
        let join = Payload::Join(Join { role: self.actor.role, actor_id: self.actor.id });
        let frame = join.to_frame(request_id)?;
        self.state = SessionState::Joining { request_id };

        Ok(vec![ClientAction::Send(frame)])
    }

    fn handle_request_transition(
        &mut self,
        ride_id: RideId,
        command: RideCommand,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if !self.is_joined() {
            return Err(ClientError::NotJoined);
        }

        let expected_version =
            self.tracker.version(ride_id).ok_or(ClientError::UnknownRide { ride_id })?;

        let request_id = self.next_request_id();
        let request =
            Payload::TransitionRequest(TransitionRequest { ride_id, command, expected_version });
        let frame = request.to_frame(request_id)?;
        self.in_flight.insert(request_id, ride_id);

        Ok(vec![ClientAction::Send(frame)])
    }

    fn handle_leave(&mut self) -> Result<Vec<ClientAction>, ClientError> {
        if self.state == SessionState::Disconnected {
            return Ok(vec![]);
        }

        let request_id = self.next_request_id();
        let goodbye = Payload::Goodbye(Goodbye { reason: CloseReason::ClientLeave });
        let frame = goodbye.to_frame(request_id)?;
        self.reset();

        Ok(vec![
            ClientAction::Send(frame),
            ClientAction::Closed { reason: CloseReason::ClientLeave },
        ])
    }

    fn handle_frame(&mut self, frame: &Frame) -> Result<Vec<ClientAction>, ClientError> {
        let request_id = frame.header.request_id();
        let payload = Payload::from_frame(frame)
            .map_err(|e| ClientError::InvalidFrame { reason: e.to_string() })?;

        match payload {
            Payload::Joined(joined) => Ok(self.handle_joined(request_id, joined)),
            Payload::RideEvent(event) => Ok(self.handle_ride_event(event)),
            Payload::TransitionAccepted(accepted) => {
                self.in_flight.remove(&request_id);
                let mut actions = Vec::with_capacity(2);
                if self.tracker.apply(&accepted.ride) {
                    actions.push(ClientAction::RideUpdated {
                        event: None,
                        ride: accepted.ride.clone(),
                        driver: None,
                        trip: None,
                    });
                }
                actions.push(ClientAction::TransitionAccepted { request_id, ride: accepted.ride });
                Ok(actions)
            },
            Payload::Error(error) => {
                if self.state == (SessionState::Joining { request_id }) {
                    self.state = SessionState::Disconnected;
                }
                let ride_id = self.in_flight.remove(&request_id);
                Ok(vec![ClientAction::Rejected { request_id, ride_id, error }])
            },
            Payload::Goodbye(goodbye) => {
                self.reset();
                Ok(vec![ClientAction::Closed { reason: goodbye.reason }])
            },
            Payload::Ping => Ok(vec![ClientAction::Send(Payload::Pong.to_frame(request_id)?)]),
            Payload::Pong => Ok(vec![]),
            Payload::Join(_) | Payload::TransitionRequest(_) => Err(ClientError::InvalidFrame {
                reason: format!("unexpected {:?} from server", frame.header.opcode_enum()),
            }),
        }
    }

    fn handle_joined(&mut self, request_id: u32, joined: Joined) -> Vec<ClientAction> {
        if self.state != (SessionState::Joining { request_id }) {
            // Replayed events already went through handle_ride_event; a
            // Joined for a join we no longer wait on carries nothing new.
            return vec![];
        }

        self.state = SessionState::Joined { session_id: joined.session_id };

        let mut actions: Vec<ClientAction> = joined
            .active_rides
            .into_iter()
            .filter(|ride| self.tracker.apply(ride))
            .map(|ride| ClientAction::RideUpdated { event: None, ride, driver: None, trip: None })
            .collect();

        actions.push(ClientAction::Joined {
            session_id: joined.session_id,
            replayed: joined.replayed,
        });
        actions
    }

    fn handle_ride_event(&mut self, event: RideEvent) -> Vec<ClientAction> {
        if !self.tracker.apply_event(&event) {
            return vec![];
        }

        vec![ClientAction::RideUpdated {
            event: Some(event.event),
            ride: event.ride,
            driver: event.driver,
            trip: event.trip,
        }]
    }

    fn reset(&mut self) {
        self.state = SessionState::Disconnected;
        self.in_flight.clear();
    }

    fn next_request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use ridelink_proto::{
        ErrorPayload, Ride, RideEventKind, RideState, VehicleType,
        payloads::ride::TransitionAccepted,
    };

    use super::*;

    fn ride(version: u64, state: RideState) -> Ride {
        Ride {
            ride_id: 42,
            rider_id: 1,
            driver_id: None,
            driver: None,
            state,
            pickup: "Koramangala".into(),
            destination: "Indiranagar".into(),
            fare: 250,
            vehicle_type: VehicleType::Auto,
            created_at: 0,
            updated_at: 0,
            started_at: None,
            completed_at: None,
            final_fare: None,
            cancelled_by: None,
            cancel_reason: None,
            version,
        }
    }

    fn sent(actions: &[ClientAction]) -> Vec<Payload> {
        actions
            .iter()
            .filter_map(|a| match a {
                ClientAction::Send(frame) => Some(Payload::from_frame(frame).unwrap()),
                _ => None,
            })
            .collect()
    }

    fn request_id_of(actions: &[ClientAction]) -> u32 {
        match &actions[0] {
            ClientAction::Send(frame) => frame.header.request_id(),
            other => panic!("expected send, got {other:?}"),
        }
    }

    fn server(payload: Payload, request_id: u32) -> ClientEvent {
        ClientEvent::FrameReceived(payload.to_frame(request_id).unwrap())
    }

    fn joined_client(active_rides: Vec<Ride>) -> Client {
        let mut client = Client::new(Actor::rider(1));
        let actions = client.handle(ClientEvent::Connect).unwrap();
        let request_id = request_id_of(&actions);
        client
            .handle(server(
                Payload::Joined(Joined { session_id: 9, replayed: 0, active_rides }),
                request_id,
            ))
            .unwrap();
        client
    }

    #[test]
    fn connect_sends_join_for_actor() {
        let mut client = Client::new(Actor::driver(7));
        let actions = client.handle(ClientEvent::Connect).unwrap();

        assert_eq!(sent(&actions), vec![Payload::Join(Join {
            role: ridelink_proto::Role::Driver,
            actor_id: 7
        })]);
        assert!(matches!(client.state(), SessionState::Joining { .. }));
        assert!(matches!(client.handle(ClientEvent::Connect), Err(ClientError::AlreadyConnected)));
    }

    #[test]
    fn joined_snapshot_seeds_tracker() {
        let client = joined_client(vec![ride(3, RideState::Arriving)]);

        assert!(client.is_joined());
        assert_eq!(client.tracker().version(42), Some(3));
    }

    #[test]
    fn transition_uses_tracked_version() {
        let mut client = joined_client(vec![ride(3, RideState::Arriving)]);

        let actions = client
            .handle(ClientEvent::RequestTransition {
                ride_id: 42,
                command: RideCommand::Cancel { reason: None },
            })
            .unwrap();

        let sent_payloads = sent(&actions);
        let [Payload::TransitionRequest(request)] = sent_payloads.as_slice() else {
            panic!("expected one transition request");
        };
        assert_eq!(request.expected_version, 3);
        assert_eq!(client.in_flight(), 1);
    }

    #[test]
    fn transition_requires_join_and_known_ride() {
        let mut client = Client::new(Actor::rider(1));
        let request = ClientEvent::RequestTransition { ride_id: 42, command: RideCommand::Start };
        assert!(matches!(client.handle(request.clone()), Err(ClientError::NotJoined)));

        let mut client = joined_client(vec![]);
        assert!(matches!(client.handle(request), Err(ClientError::UnknownRide { ride_id: 42 })));
    }

    #[test]
    fn duplicate_push_produces_no_action() {
        let mut client = joined_client(vec![]);
        let event = Payload::RideEvent(RideEvent {
            event: RideEventKind::RideAccepted,
            ride: ride(2, RideState::Accepted),
            driver: None,
            trip: None,
        });

        let first = client.handle(server(event.clone(), 0)).unwrap();
        let second = client.handle(server(event, 0)).unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn reply_after_push_still_resolves_request() {
        let mut client = joined_client(vec![ride(1, RideState::Requested)]);
        let actions = client
            .handle(ClientEvent::RequestTransition { ride_id: 42, command: RideCommand::Arrive })
            .unwrap();
        let request_id = request_id_of(&actions);

        let updated = ride(2, RideState::Arriving);
        client
            .handle(server(
                Payload::RideEvent(RideEvent {
                    event: RideEventKind::RideArriving,
                    ride: updated.clone(),
                    driver: None,
                    trip: None,
                }),
                0,
            ))
            .unwrap();
        let actions = client
            .handle(server(
                Payload::TransitionAccepted(TransitionAccepted { ride: updated.clone() }),
                request_id,
            ))
            .unwrap();

        assert_eq!(actions, vec![ClientAction::TransitionAccepted { request_id, ride: updated }]);
        assert_eq!(client.in_flight(), 0);
    }

    #[test]
    fn error_reply_names_the_ride() {
        let mut client = joined_client(vec![ride(1, RideState::Requested)]);
        let actions = client
            .handle(ClientEvent::RequestTransition { ride_id: 42, command: RideCommand::Arrive })
            .unwrap();
        let request_id = request_id_of(&actions);

        let error = ErrorPayload::new(ErrorPayload::STALE_VERSION, 409, "stale");
        let actions = client.handle(server(Payload::Error(error.clone()), request_id)).unwrap();

        assert_eq!(actions, vec![ClientAction::Rejected { request_id, ride_id: Some(42), error }]);
    }

    #[test]
    fn goodbye_disconnects_and_keeps_rides() {
        let mut client = joined_client(vec![ride(2, RideState::Accepted)]);

        let actions = client
            .handle(server(
                Payload::Goodbye(Goodbye { reason: CloseReason::ReplacedByNewSession }),
                0,
            ))
            .unwrap();

        assert_eq!(actions, vec![ClientAction::Closed {
            reason: CloseReason::ReplacedByNewSession
        }]);
        assert_eq!(client.state(), SessionState::Disconnected);
        assert_eq!(client.tracker().version(42), Some(2));
    }

    #[test]
    fn leave_sends_goodbye() {
        let mut client = joined_client(vec![]);
        let actions = client.handle(ClientEvent::Leave).unwrap();

        assert_eq!(sent(&actions), vec![Payload::Goodbye(Goodbye {
            reason: CloseReason::ClientLeave
        })]);
        assert!(client.handle(ClientEvent::Leave).unwrap().is_empty());
    }

    #[test]
    fn server_ping_is_answered() {
        let mut client = joined_client(vec![]);
        let actions = client.handle(server(Payload::Ping, 5)).unwrap();

        assert_eq!(sent(&actions), vec![Payload::Pong]);
        assert_eq!(request_id_of(&actions), 5);
    }
}
