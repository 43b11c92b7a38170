//! Ride coordination: the one place rides change.
//!
//! [`CoordinationService`] glues the pure state machine to the store and the
//! registry. Every change follows the same path:
//!
//! ```text
//! load ──► machine::transition ──► compare_and_swap ──► deliver notifications
//! ```
//!
//! Nothing is delivered unless the compare-and-swap committed, and the
//! delivered events are built from the committed ride. Concurrent writers
//! race on the version; the loser gets `StaleVersion` and no side effects.

use std::time::Duration;

use ridelink_core::{
    Notification, RideRequest,
    env::Environment,
    machine::{self, EXPIRY_REASON},
    ride,
};
use ridelink_proto::{
    Actor, ActorId, Payload, Ride, RideCommand, RideId, RideState, SessionId,
};

use crate::{
    coordination_error::CoordinationError,
    registry::{ConnectionRegistry, JoinOutcome},
    session::Session,
    storage::{RideStore, StorageError},
};

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Age after which a `requested` ride nobody accepted is cancelled
    pub request_ttl: Duration,
    /// How often the expiry sweep runs
    pub sweep_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { request_ttl: Duration::from_secs(5 * 60), sweep_interval: Duration::from_secs(30) }
    }
}

/// Validates, persists and announces ride changes.
///
/// Cheap to clone; clones share the store and the registry.
#[derive(Clone)]
pub struct CoordinationService<E: Environment, S: RideStore> {
    env: E,
    store: S,
    registry: ConnectionRegistry,
    config: CoordinatorConfig,
}

impl<E: Environment, S: RideStore> CoordinationService<E, S> {
    /// Create a service over `store`, delivering through `registry`.
    pub fn new(env: E, store: S, registry: ConnectionRegistry, config: CoordinatorConfig) -> Self {
        Self { env, store, registry, config }
    }

    /// Environment in use.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Registry used for delivery.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Configuration in use.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Fresh session identifier.
    pub fn new_session_id(&self) -> SessionId {
        self.env.random_u64()
    }

    /// Create a `requested` ride for `rider_id` and offer it to `candidates`.
    ///
    /// Candidate selection (nearby drivers) happens outside; duplicates in
    /// `candidates` receive one offer.
    pub async fn create_ride(
        &self,
        rider_id: ActorId,
        request: RideRequest,
        candidates: &[ActorId],
    ) -> Result<Ride, CoordinationError> {
        let ride = ride::new_ride(self.env.random_u128(), rider_id, request, self.env.wall_clock_ms())?;
        self.store.insert(&ride)?;

        tracing::info!(
            ride_id = %format_args!("{:032x}", ride.ride_id),
            rider = rider_id,
            candidates = candidates.len(),
            "ride requested"
        );

        self.notify(machine::offers(&ride, candidates)).await;
        Ok(ride)
    }

    /// Apply `command` from `actor` to a ride the caller saw at
    /// `expected_version`.
    ///
    /// Returns the committed ride. On any error nothing was written and
    /// nobody was notified.
    pub async fn request_transition(
        &self,
        ride_id: RideId,
        command: RideCommand,
        actor: Actor,
        expected_version: u64,
    ) -> Result<Ride, CoordinationError> {
        let current = self.store.load(ride_id)?;

        let transition = machine::transition(
            &current,
            &command,
            actor,
            expected_version,
            self.env.wall_clock_ms(),
        )
        .inspect_err(|e| {
            tracing::debug!(
                ride_id = %format_args!("{ride_id:032x}"),
                %actor,
                version = expected_version,
                error = %e,
                "transition rejected"
            );
        })?;

        let persisted =
            self.store.compare_and_swap(ride_id, expected_version, |_| transition.ride.clone())?;

        tracing::info!(
            ride_id = %format_args!("{ride_id:032x}"),
            %actor,
            version = persisted.version,
            event = %transition.event,
            "ride transitioned"
        );

        self.notify(transition.notifications_for(&persisted)).await;
        if current.state == RideState::Requested {
            self.registry.withdraw_offers(ride_id).await;
        }
        Ok(persisted)
    }

    /// Cancel `requested` rides older than the request TTL at `now_ms`.
    ///
    /// A ride that moves while being expired (usually a driver accepting it)
    /// is skipped: the accept wins. A storage failure on one ride is logged
    /// and the sweep moves on. Returns the rides that were cancelled.
    pub async fn expire_abandoned(&self, now_ms: u64) -> Result<Vec<Ride>, CoordinationError> {
        let ttl_ms = u64::try_from(self.config.request_ttl.as_millis()).unwrap_or(u64::MAX);
        let mut expired = Vec::new();

        for ride in self.store.rides_in_state(RideState::Requested)? {
            if now_ms.saturating_sub(ride.created_at) < ttl_ms {
                continue;
            }
            let Ok(transition) = machine::expire(&ride, ride.version, now_ms) else {
                continue;
            };

            match self.store.compare_and_swap(ride.ride_id, ride.version, |_| transition.ride.clone())
            {
                Ok(persisted) => {
                    tracing::info!(
                        ride_id = %format_args!("{:032x}", persisted.ride_id),
                        version = persisted.version,
                        reason = EXPIRY_REASON,
                        "ride expired"
                    );
                    self.notify(transition.notifications_for(&persisted)).await;
                    self.registry.withdraw_offers(persisted.ride_id).await;
                    expired.push(persisted);
                },
                Err(StorageError::StaleVersion { .. } | StorageError::NotFound(_)) => {
                    tracing::debug!(
                        ride_id = %format_args!("{:032x}", ride.ride_id),
                        "ride moved during expiry, skipped"
                    );
                },
                Err(e) => {
                    tracing::warn!(
                        ride_id = %format_args!("{:032x}", ride.ride_id),
                        error = %e,
                        "expiry failed"
                    );
                },
            }
        }

        Ok(expired)
    }

    /// Run the expiry sweep every `sweep_interval`, forever.
    pub async fn run_sweeper(&self) {
        loop {
            self.env.sleep(self.config.sweep_interval).await;

            match self.expire_abandoned(self.env.wall_clock_ms()).await {
                Ok(expired) if !expired.is_empty() => {
                    tracing::info!(count = expired.len(), "expiry sweep cancelled rides");
                },
                Ok(_) => {},
                Err(e) => tracing::warn!(error = %e, "expiry sweep failed"),
            }
        }
    }

    /// Make `session` the actor's live session and replay what it missed.
    ///
    /// First connect and reconnect take the same path.
    pub async fn join(&self, session: Session) -> JoinOutcome {
        let actor = session.actor();
        let session_id = session.id();
        let outcome = self.registry.on_join(session).await;

        tracing::info!(
            %actor,
            session_id,
            replayed = outcome.replayed,
            still_queued = outcome.still_queued,
            superseded = ?outcome.superseded,
            "actor joined"
        );
        outcome
    }

    /// Drop the actor's session if it is still `session_id`.
    pub fn leave(&self, actor: Actor, session_id: SessionId) -> bool {
        let removed = self.registry.unregister(actor, session_id);
        tracing::debug!(%actor, session_id, removed, "actor left");
        removed
    }

    /// Non-terminal rides involving `actor`, oldest first.
    pub fn snapshot(&self, actor: Actor) -> Result<Vec<Ride>, CoordinationError> {
        Ok(self.store.active_rides(actor)?)
    }

    /// Current state of one ride.
    pub fn ride(&self, ride_id: RideId) -> Result<Ride, CoordinationError> {
        Ok(self.store.load(ride_id)?)
    }

    async fn notify(&self, notifications: Vec<Notification>) {
        for Notification { recipient, event } in notifications {
            let ride_id = event.ride_id();
            let version = event.version();
            let kind = event.event;

            let outcome = self.registry.deliver(recipient, Payload::RideEvent(event)).await;
            tracing::debug!(
                ride_id = %format_args!("{ride_id:032x}"),
                actor = %recipient,
                version,
                event = %kind,
                ?outcome,
                "notification"
            );
        }
    }
}
