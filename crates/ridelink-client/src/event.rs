//! Client events and actions.

use ridelink_proto::{
    CloseReason, DriverProfile, ErrorPayload, Frame, Ride, RideCommand, RideEventKind, RideId,
    SessionId, TripDetail,
};

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Receiving frames from the network
/// - Forwarding application intents (accept, cancel, ...)
/// - Reporting a dropped connection so the next `Connect` rejoins
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Frame received from server.
    FrameReceived(Frame),

    /// A fresh connection is up; announce the actor on it.
    Connect,

    /// The connection dropped without a `Goodbye`.
    Disconnected,

    /// Application wants to change a ride.
    ///
    /// The expected version is the one the tracker currently holds.
    RequestTransition {
        /// Target ride
        ride_id: RideId,
        /// Change to apply
        command: RideCommand,
    },

    /// Keepalive.
    Ping,

    /// Application is leaving; tell the server and drop the session.
    Leave,
}

/// Actions produced by the client for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Send frame to server.
    Send(Frame),

    /// Session is joined and caught up.
    Joined {
        /// Server-assigned session id
        session_id: SessionId,
        /// Events the server replayed before acknowledging
        replayed: u32,
    },

    /// A newer version of a ride is now tracked.
    RideUpdated {
        /// Event that carried it; `None` for snapshots and transition replies
        event: Option<RideEventKind>,
        /// Ride as now held by the tracker
        ride: Ride,
        /// Driver profile, on a rider's `ride-accepted`
        driver: Option<DriverProfile>,
        /// Trip detail, on driver-facing offers and accepts
        trip: Option<TripDetail>,
    },

    /// A transition this client asked for was committed.
    TransitionAccepted {
        /// Request id of the `TransitionRequest`
        request_id: u32,
        /// Ride as persisted
        ride: Ride,
    },

    /// The server refused a request.
    Rejected {
        /// Request id of the refused frame
        request_id: u32,
        /// Ride the request was about, if it was a transition
        ride_id: Option<RideId>,
        /// Server's reason
        error: ErrorPayload,
    },

    /// The session ended.
    Closed {
        /// Server's reason, or `client-leave` for our own goodbye
        reason: CloseReason,
    },
}
