//! Property tests for the connection registry.
//!
//! Whatever mix of joins, leaves, broken sessions and deliveries happens, an
//! actor ends up seeing every event addressed to it exactly once and in
//! order, as long as its replay queue never overflows.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use proptest::prelude::*;
use ridelink_proto::{Actor, CloseReason, ErrorPayload, Payload, SessionId};
use ridelink_server::{ConnectionRegistry, DeliveryError, RegistryConfig, Session, SessionTransport};

#[derive(Default)]
struct Recorder {
    received: tokio::sync::Mutex<Vec<u16>>,
    broken: AtomicBool,
}

#[async_trait]
impl SessionTransport for Recorder {
    async fn send(&self, payload: Payload) -> Result<(), DeliveryError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(DeliveryError::Transport("reset by peer".into()));
        }
        if let Payload::Error(ErrorPayload { code, .. }) = payload {
            self.received.lock().await.push(code);
        }
        Ok(())
    }

    fn close(&self, _reason: CloseReason) {}
}

fn event(seq: u16) -> Payload {
    Payload::Error(ErrorPayload::new(seq, 0, "event"))
}

#[derive(Debug, Clone)]
enum Op {
    Deliver(usize),
    Join(usize),
    Leave(usize),
    Break(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..3usize).prop_map(Op::Deliver),
        2 => (0..3usize).prop_map(Op::Join),
        1 => (0..3usize).prop_map(Op::Leave),
        1 => (0..3usize).prop_map(Op::Break),
    ]
}

#[derive(Default)]
struct ActorModel {
    sessions: Vec<Arc<Recorder>>,
    current: Option<SessionId>,
    sent: u16,
}

const ACTORS: [Actor; 3] = [Actor::rider(1), Actor::driver(1), Actor::driver(2)];

fn registry(replay_capacity: usize) -> ConnectionRegistry {
    ConnectionRegistry::new(RegistryConfig {
        replay_capacity,
        delivery_timeout: Duration::from_millis(50),
    })
}

#[test]
fn prop_every_event_arrives_once_in_order() {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

    proptest!(|(ops in prop::collection::vec(op(), 1..80))| {
        runtime.block_on(async {
            let registry = registry(1_000);
            let mut models: Vec<ActorModel> = (0..ACTORS.len()).map(|_| ActorModel::default()).collect();
            let mut next_session: SessionId = 1;

            for op in ops {
                match op {
                    Op::Deliver(i) => {
                        registry.deliver(ACTORS[i], event(models[i].sent)).await;
                        models[i].sent += 1;
                    },
                    Op::Join(i) => {
                        let recorder = Arc::new(Recorder::default());
                        let session = Session::new(next_session, ACTORS[i], 0, recorder.clone());
                        registry.on_join(session).await;
                        models[i].sessions.push(recorder);
                        models[i].current = Some(next_session);
                        next_session += 1;
                    },
                    Op::Leave(i) => {
                        if let Some(id) = models[i].current.take() {
                            registry.unregister(ACTORS[i], id);
                        }
                    },
                    Op::Break(i) => {
                        if let Some(last) = models[i].sessions.last() {
                            last.broken.store(true, Ordering::SeqCst);
                        }
                    },
                }

                // A superseded or departed session is never returned
                for (i, model) in models.iter().enumerate() {
                    if let Some(session) = registry.lookup(ACTORS[i]) {
                        assert_eq!(Some(session.id()), model.current);
                    }
                }
            }

            // Final healthy reconnect collects whatever is still queued
            for (i, model) in models.iter_mut().enumerate() {
                let recorder = Arc::new(Recorder::default());
                registry.on_join(Session::new(next_session, ACTORS[i], 0, recorder.clone())).await;
                next_session += 1;
                model.sessions.push(recorder);

                let mut seen = Vec::new();
                for session in &model.sessions {
                    seen.extend(session.received.lock().await.iter().copied());
                }
                assert_eq!(seen, (0..model.sent).collect::<Vec<_>>(), "actor {}", ACTORS[i]);
                assert_eq!(registry.pending(ACTORS[i]).await, 0);
            }
            assert_eq!(registry.dropped_events(), 0);
        });
    });
}

#[test]
fn prop_overflow_keeps_newest() {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

    proptest!(|(capacity in 1usize..10, sent in 0u16..40)| {
        runtime.block_on(async {
            let registry = registry(capacity);
            let actor = ACTORS[0];
            for seq in 0..sent {
                registry.deliver(actor, event(seq)).await;
            }

            let recorder = Arc::new(Recorder::default());
            let outcome = registry.on_join(Session::new(1, actor, 0, recorder.clone())).await;

            let kept = usize::from(sent).min(capacity);
            let first = sent - kept as u16;
            assert_eq!(outcome.replayed, kept);
            assert_eq!(*recorder.received.lock().await, (first..sent).collect::<Vec<_>>());
            assert_eq!(registry.dropped_events(), u64::from(first));
        });
    });
}
