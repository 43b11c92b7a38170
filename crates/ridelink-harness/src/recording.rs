//! In-memory session transport.
//!
//! Records every payload pushed to a session so tests can assert on exactly
//! what an actor was sent, and injects the two failure modes the registry
//! cares about: a write that errors and a write that never completes.

#![allow(clippy::disallowed_types, reason = "short synchronous sections only")]

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use ridelink_core::env::Environment;
use ridelink_proto::{Actor, CloseReason, Payload, RideEvent};
use ridelink_server::{CoordinationService, DeliveryError, RideStore, Session, SessionTransport};

/// Session transport that keeps what it is sent.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Payload>>,
    closed: Mutex<Option<CloseReason>>,
    fail: AtomicBool,
    stall: AtomicBool,
}

impl RecordingTransport {
    /// Fresh transport.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Session over a new recording transport, with an id drawn from the
    /// coordinator's environment.
    pub fn session<E: Environment, S: RideStore>(
        coordinator: &CoordinationService<E, S>,
        actor: Actor,
    ) -> (Session, Arc<Self>) {
        let transport = Self::new();
        let session = Session::new(
            coordinator.new_session_id(),
            actor,
            coordinator.env().wall_clock_ms(),
            transport.clone(),
        );
        (session, transport)
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<Payload> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Ride events sent so far, in order.
    pub fn events(&self) -> Vec<RideEvent> {
        self.sent()
            .into_iter()
            .filter_map(|payload| match payload {
                Payload::RideEvent(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    /// Reason the session was closed with, if it was.
    pub fn closed(&self) -> Option<CloseReason> {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every following send fail.
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make every following send hang.
    pub fn stall_sends(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionTransport for RecordingTransport {
    async fn send(&self, payload: Payload) -> Result<(), DeliveryError> {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeliveryError::Transport("injected failure".into()));
        }
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(payload);
        Ok(())
    }

    fn close(&self, reason: CloseReason) {
        self.closed.lock().unwrap_or_else(PoisonError::into_inner).get_or_insert(reason);
    }
}
