//! Connection registry: which session speaks for which actor, plus the events
//! waiting for actors that are not reachable right now.
//!
//! Each actor has at most one live session. A new join replaces the old
//! session (last join wins) and the displaced one is closed with
//! `replaced-by-new-session`.
//!
//! Events that cannot be delivered go into a bounded per-actor replay queue
//! and are flushed, in order, when the actor joins again. While the queue is
//! non-empty no live delivery is attempted, so an actor always sees its
//! events in the order they were produced.
//!
//! A queued offer (`ride-requested`) is withdrawn once its ride leaves
//! `requested`, so a driver who was offline never replays a ride nobody can
//! take any more.
//!
//! Locking: the actor map and each slot's session sit behind short
//! synchronous locks that are never held across an await. The replay queue
//! sits behind a per-actor async mutex, which also serializes deliveries to
//! that actor. Unrelated actors never wait on each other.

#![allow(clippy::disallowed_types, reason = "Short synchronous sections, never held across await")]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use ridelink_proto::{Actor, CloseReason, Payload, RideEventKind, RideId, Role, SessionId};

use crate::session::{DeliveryError, Session};

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum events queued per actor; the oldest is dropped beyond this
    pub replay_capacity: usize,
    /// Maximum time a single push may take before the session is dropped
    pub delivery_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { replay_capacity: 50, delivery_timeout: Duration::from_secs(2) }
    }
}

/// Why an event was queued instead of delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueCause {
    /// Actor has no live session
    Offline,
    /// Earlier events are still waiting; delivering now would reorder
    Backlog,
    /// The push failed or timed out; the session was dropped
    Failed(DeliveryError),
}

/// Result of [`ConnectionRegistry::deliver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Written to the actor's live session
    Delivered,
    /// Held in the replay queue
    Queued {
        /// Why it was not delivered
        cause: QueueCause,
    },
}

impl DeliveryOutcome {
    /// Whether the event reached a live session.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Result of [`ConnectionRegistry::on_join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Session displaced by this join, if any
    pub superseded: Option<SessionId>,
    /// Events flushed from the replay queue
    pub replayed: usize,
    /// Events still queued because the flush failed part-way
    pub still_queued: usize,
}

/// Tracks live sessions and replay queues per actor.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    config: RegistryConfig,
    slots: RwLock<HashMap<Actor, Arc<ActorSlot>>>,
    dropped: AtomicU64,
}

#[derive(Default)]
struct ActorSlot {
    session: Mutex<Option<Session>>,
    queue: tokio::sync::Mutex<VecDeque<Payload>>,
}

impl ActorSlot {
    fn current(&self) -> Option<Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Install `session`, returning the one it replaces.
    fn install(&self, session: Session) -> Option<Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).replace(session)
    }

    /// Remove the current session if it is `session_id`.
    fn detach(&self, session_id: SessionId) -> Option<Session> {
        let mut current = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|s| s.id() == session_id) { current.take() } else { None }
    }

    fn is_idle(&self) -> bool {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).is_none()
            && self.queue.try_lock().is_ok_and(|q| q.is_empty())
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                slots: RwLock::new(HashMap::new()),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Install `session` as the only live session of its actor.
    ///
    /// A previous session is closed with `replaced-by-new-session` and
    /// returned. Queued events are left alone; use [`Self::on_join`] to
    /// register and flush in one step.
    pub fn register(&self, session: Session) -> Option<Session> {
        let slot = self.slot(session.actor());
        Self::install(&slot, session)
    }

    fn install(slot: &ActorSlot, session: Session) -> Option<Session> {
        let new_id = session.id();
        let actor = session.actor();
        let previous = slot.install(session).filter(|old| old.id() != new_id)?;

        tracing::info!(
            %actor,
            session_id = new_id,
            replaced = previous.id(),
            "session superseded"
        );
        previous.close(CloseReason::ReplacedByNewSession);
        Some(previous)
    }

    /// Remove the actor's session, but only if it is still `session_id`.
    ///
    /// A late disconnect of a superseded session therefore never evicts its
    /// replacement. Returns whether a session was removed.
    pub fn unregister(&self, actor: Actor, session_id: SessionId) -> bool {
        let Some(slot) = self.existing_slot(actor) else {
            return false;
        };
        let removed = slot.detach(session_id).is_some();
        drop(slot);

        if removed {
            tracing::debug!(%actor, session_id, "session unregistered");
            self.prune(actor);
        }
        removed
    }

    /// Live session of `actor`. Never waits.
    pub fn lookup(&self, actor: Actor) -> Option<Session> {
        self.existing_slot(actor)?.current()
    }

    /// Push `event` to `actor`, or queue it for replay.
    ///
    /// Never fails: an event that cannot be written now is queued, and a
    /// session whose push fails or exceeds the delivery timeout is detached
    /// and closed so the client reconnects and catches up.
    pub async fn deliver(&self, actor: Actor, event: Payload) -> DeliveryOutcome {
        let slot = self.slot(actor);
        let mut queue = slot.queue.lock().await;

        let Some(session) = slot.current() else {
            self.enqueue(actor, &mut queue, event);
            return DeliveryOutcome::Queued { cause: QueueCause::Offline };
        };

        if !queue.is_empty() {
            self.enqueue(actor, &mut queue, event);
            return DeliveryOutcome::Queued { cause: QueueCause::Backlog };
        }

        match self.push(&session, event.clone()).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(error) => {
                self.enqueue(actor, &mut queue, event);
                Self::abandon(&slot, &session, &error);
                DeliveryOutcome::Queued { cause: QueueCause::Failed(error) }
            },
        }
    }

    /// Register `session` and flush its actor's replay queue to it.
    ///
    /// Deliveries to the actor wait until the flush is done, so nothing
    /// overtakes the replayed events. If a replayed push fails the session is
    /// dropped and the rest of the queue (that event included) is kept.
    pub async fn on_join(&self, session: Session) -> JoinOutcome {
        let actor = session.actor();
        let slot = self.slot(actor);
        let mut queue = slot.queue.lock().await;

        let superseded = Self::install(&slot, session.clone()).map(|s| s.id());

        let mut replayed = 0;
        while let Some(event) = queue.pop_front() {
            if let Err(error) = self.push(&session, event.clone()).await {
                queue.push_front(event);
                Self::abandon(&slot, &session, &error);
                break;
            }
            replayed += 1;
        }

        if replayed > 0 {
            tracing::info!(%actor, session_id = session.id(), replayed, "replayed queued events");
        }

        JoinOutcome { superseded, replayed, still_queued: queue.len() }
    }

    /// Number of events waiting for `actor`.
    pub async fn pending(&self, actor: Actor) -> usize {
        match self.existing_slot(actor) {
            Some(slot) => slot.queue.lock().await.len(),
            None => 0,
        }
    }

    /// Remove queued offers for `ride_id` from every driver's replay queue.
    ///
    /// Other queued events keep their order. Returns how many were removed.
    pub async fn withdraw_offers(&self, ride_id: RideId) -> usize {
        let slots: Vec<(Actor, Arc<ActorSlot>)> = self
            .slots()
            .iter()
            .filter(|(actor, _)| actor.role == Role::Driver)
            .map(|(actor, slot)| (*actor, Arc::clone(slot)))
            .collect();

        let mut withdrawn = 0;
        for (actor, slot) in slots {
            let emptied = {
                let mut queue = slot.queue.lock().await;
                let before = queue.len();
                queue.retain(|event| !is_offer_for(event, ride_id));
                withdrawn += before - queue.len();
                before > queue.len() && queue.is_empty()
            };
            drop(slot);
            if emptied {
                self.prune(actor);
            }
        }

        if withdrawn > 0 {
            tracing::debug!(
                ride_id = %format_args!("{ride_id:032x}"),
                withdrawn,
                "withdrew queued offers"
            );
        }
        withdrawn
    }

    /// Number of actors with a live session.
    pub fn session_count(&self) -> usize {
        self.slots().values().filter(|slot| slot.current().is_some()).count()
    }

    /// Events dropped from full replay queues since startup.
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Detach and close every live session. Returns how many were closed.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let slots: Vec<Arc<ActorSlot>> = self.slots().values().cloned().collect();

        let mut closed = 0;
        for slot in slots {
            let session = slot.session.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(session) = session {
                session.close(reason);
                closed += 1;
            }
        }
        closed
    }

    async fn push(&self, session: &Session, event: Payload) -> Result<(), DeliveryError> {
        let timeout = self.inner.config.delivery_timeout;
        match tokio::time::timeout(timeout, session.send(event)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        }
    }

    fn abandon(slot: &ActorSlot, session: &Session, error: &DeliveryError) {
        tracing::warn!(
            actor = %session.actor(),
            session_id = session.id(),
            %error,
            "delivery failed, dropping session"
        );
        if slot.detach(session.id()).is_some() {
            session.close(error.close_reason());
        }
    }

    fn enqueue(&self, actor: Actor, queue: &mut VecDeque<Payload>, event: Payload) {
        let capacity = self.inner.config.replay_capacity;
        if capacity == 0 {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%actor, "replay queue disabled, event dropped");
            return;
        }

        while queue.len() >= capacity {
            queue.pop_front();
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%actor, capacity, "replay queue full, dropped oldest event");
        }
        queue.push_back(event);
    }

    fn slots(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Actor, Arc<ActorSlot>>> {
        self.inner.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn existing_slot(&self, actor: Actor) -> Option<Arc<ActorSlot>> {
        self.slots().get(&actor).cloned()
    }

    fn slot(&self, actor: Actor) -> Arc<ActorSlot> {
        if let Some(slot) = self.existing_slot(actor) {
            return slot;
        }

        let mut slots = self.inner.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(actor).or_default())
    }

    /// Forget `actor`'s slot if nothing references it and it holds nothing.
    fn prune(&self, actor: Actor) {
        let mut slots = self.inner.slots.write().unwrap_or_else(PoisonError::into_inner);
        let idle =
            slots.get(&actor).is_some_and(|slot| Arc::strong_count(slot) == 1 && slot.is_idle());
        if idle {
            slots.remove(&actor);
        }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots().len()
    }
}

fn is_offer_for(event: &Payload, ride_id: RideId) -> bool {
    matches!(event, Payload::RideEvent(e)
        if e.event == RideEventKind::RideRequested && e.ride.ride_id == ride_id)
}
