//! Live sessions and the transports behind them.
//!
//! A [`Session`] is one connected actor. It owns an `Arc<dyn SessionTransport>`
//! so the registry can push to it without knowing whether the bytes go over a
//! QUIC stream, a simulated TCP socket, or a test recorder.
//!
//! [`FrameWriter`] is the transport used by real connections: a bounded queue
//! drained by a single writer task, so pushes and request replies share one
//! ordered byte stream.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use ridelink_proto::{
    Actor, CloseReason, Frame, Payload, SessionId, payloads::session::Goodbye,
};
use thiserror::Error;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

/// Why a push to a session did not complete.
///
/// Never surfaced to the caller of a transition: the registry queues the
/// event for replay and drops the session instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Write did not finish within the delivery timeout
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    /// Transport reported a failure or is already closed
    #[error("transport failed: {0}")]
    Transport(String),
}

impl DeliveryError {
    /// Close reason to report to the session being dropped.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            Self::Timeout(_) => CloseReason::DeliveryTimeout,
            Self::Transport(_) => CloseReason::TransportFailed,
        }
    }
}

/// Outbound half of a connection.
#[async_trait]
pub trait SessionTransport: Send + Sync + 'static {
    /// Write `payload` to the peer. Resolves once the bytes are handed to the
    /// underlying stream.
    async fn send(&self, payload: Payload) -> Result<(), DeliveryError>;

    /// Close the connection. Idempotent; the first reason wins.
    fn close(&self, reason: CloseReason);
}

/// One live connection of an actor.
///
/// Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    actor: Actor,
    joined_at: u64,
    transport: Arc<dyn SessionTransport>,
}

impl Session {
    /// Create a session for `actor` over `transport`.
    pub fn new(
        id: SessionId,
        actor: Actor,
        joined_at: u64,
        transport: Arc<dyn SessionTransport>,
    ) -> Self {
        Self { id, actor, joined_at, transport }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Actor this session belongs to.
    pub fn actor(&self) -> Actor {
        self.actor
    }

    /// Join time (Unix ms).
    pub fn joined_at(&self) -> u64 {
        self.joined_at
    }

    /// Push a payload through the transport.
    pub async fn send(&self, payload: Payload) -> Result<(), DeliveryError> {
        self.transport.send(payload).await
    }

    /// Close the transport.
    pub fn close(&self, reason: CloseReason) {
        self.transport.close(reason);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("actor", &self.actor)
            .field("joined_at", &self.joined_at)
            .finish_non_exhaustive()
    }
}

/// Time allowed to write the farewell `Goodbye` before the stream is dropped.
const GOODBYE_TIMEOUT: Duration = Duration::from_millis(250);

struct Outbound {
    frame: Frame,
    /// Signalled once the frame is written (pushes only)
    written: Option<oneshot::Sender<Result<(), String>>>,
}

/// Queue-backed transport over any async byte stream.
///
/// Frames are written in the order they are queued. `close` stops the writer
/// even when it is stuck on a stalled write, then makes a best-effort attempt
/// to send a `Goodbye` carrying the reason.
pub struct FrameWriter {
    tx: mpsc::Sender<Outbound>,
    closed: watch::Sender<Option<CloseReason>>,
}

impl FrameWriter {
    /// Spawn the writer task for `writer`.
    ///
    /// At most `capacity` frames wait in the queue; further sends wait for
    /// room, which the registry's delivery timeout bounds.
    pub fn spawn<W>(writer: W, capacity: usize) -> (Arc<Self>, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (closed, closed_rx) = watch::channel(None);

        let handle = tokio::spawn(write_loop(writer, rx, closed_rx));

        (Arc::new(Self { tx, closed }), handle)
    }

    /// Queue a reply frame without waiting for it to be written.
    pub async fn reply(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.tx
            .send(Outbound { frame, written: None })
            .await
            .map_err(|_| DeliveryError::Transport("writer closed".to_string()))
    }

    /// Resolves once the transport is closed, yielding the reason.
    pub fn closed(&self) -> watch::Receiver<Option<CloseReason>> {
        self.closed.subscribe()
    }

    /// Close reason, if closed.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.closed.borrow()
    }
}

#[async_trait]
impl SessionTransport for FrameWriter {
    async fn send(&self, payload: Payload) -> Result<(), DeliveryError> {
        let frame =
            payload.to_frame(0).map_err(|e| DeliveryError::Transport(format!("encode: {e}")))?;

        let (written, done) = oneshot::channel();
        self.tx
            .send(Outbound { frame, written: Some(written) })
            .await
            .map_err(|_| DeliveryError::Transport("writer closed".to_string()))?;

        match done.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DeliveryError::Transport(e)),
            Err(_) => Err(DeliveryError::Transport("writer closed".to_string())),
        }
    }

    fn close(&self, reason: CloseReason) {
        self.closed.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Outbound>,
    mut closed: watch::Receiver<Option<CloseReason>>,
) where
    W: AsyncWrite + Unpin + Send,
{
    let mut buf = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = closed.changed() => break,
            next = rx.recv() => next,
        };
        let Some(outbound) = next else { break };

        buf.clear();
        let result = match outbound.frame.encode(&mut buf) {
            Ok(()) => {
                tokio::select! {
                    biased;
                    _ = closed.changed() => break,
                    result = write_all_flush(&mut writer, &buf) => result,
                }
            },
            Err(e) => Err(e.to_string()),
        };

        let failed = result.is_err();
        if let Some(written) = outbound.written {
            let _ = written.send(result);
        }
        if failed {
            break;
        }
    }

    let reason = *closed.borrow();
    if let Some(reason) = reason {
        if let Ok(frame) = Payload::Goodbye(Goodbye { reason }).to_frame(0) {
            buf.clear();
            if frame.encode(&mut buf).is_ok() {
                let _ = tokio::time::timeout(GOODBYE_TIMEOUT, write_all_flush(&mut writer, &buf))
                    .await;
            }
        }
    }

    let _ = tokio::time::timeout(GOODBYE_TIMEOUT, writer.shutdown()).await;
    tracing::debug!(reason = ?reason, "session writer stopped");
}

async fn write_all_flush<W>(writer: &mut W, bytes: &[u8]) -> Result<(), String>
where
    W: AsyncWrite + Unpin + Send,
{
    writer.write_all(bytes).await.map_err(|e| e.to_string())?;
    writer.flush().await.map_err(|e| e.to_string())
}
