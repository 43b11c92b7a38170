//! Per-connection protocol handling.
//!
//! Works over any async byte stream pair, so the QUIC runtime and the
//! simulated TCP server in the harness drive the exact same code.
//!
//! ```text
//! client                          server
//!   │── Join{role, actor_id} ──────►│  register + replay queued events
//!   │◄───────────── RideEvent ... ──│
//!   │◄── Joined{session, rides} ────│
//!   │── TransitionRequest ─────────►│
//!   │◄── TransitionAccepted/Error ──│  (same request id)
//!   │◄───────────── RideEvent ... ──│  pushes at any time
//!   │── Goodbye ───────────────────►│  leave
//! ```

use std::time::Duration;

use ridelink_core::env::Environment;
use ridelink_proto::{
    CloseReason, ErrorPayload, Frame, FrameHeader, Payload,
    payloads::{
        ride::TransitionAccepted,
        session::{Join, Joined},
    },
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::{
    ServerError,
    coordinator::CoordinationService,
    session::{FrameWriter, Session, SessionTransport},
    storage::RideStore,
};

/// Time a new connection has to send its `Join`.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames waiting to be written per connection.
const OUTBOUND_CAPACITY: usize = 64;

/// Serve one connection until the peer leaves, the transport fails, or the
/// session is closed from the server side.
///
/// The session is always unregistered on the way out (if it is still the
/// actor's current one).
pub async fn serve_connection<R, W, E, S>(
    mut reader: R,
    writer: W,
    coordinator: CoordinationService<E, S>,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
    E: Environment,
    S: RideStore,
{
    let (out, writer_task) = FrameWriter::spawn(writer, OUTBOUND_CAPACITY);
    let mut buf = Vec::new();

    let Some((join, request_id)) = handshake(&mut reader, &mut buf, &out).await? else {
        drop(out);
        let _ = writer_task.await;
        return Ok(());
    };

    let actor = join.actor();
    let session_id = coordinator.new_session_id();
    let mut closed = out.closed();
    let session =
        Session::new(session_id, actor, coordinator.env().wall_clock_ms(), out.clone());

    let outcome = coordinator.join(session).await;
    let active_rides = coordinator.snapshot(actor).unwrap_or_else(|e| {
        tracing::warn!(%actor, session_id, error = %e, "snapshot failed");
        Vec::new()
    });
    let joined = Joined {
        session_id,
        replayed: u32::try_from(outcome.replayed).unwrap_or(u32::MAX),
        active_rides,
    };
    out.reply(Payload::Joined(joined).to_frame(request_id)?).await.ok();

    let result = loop {
        if out.close_reason().is_some() {
            break Ok(());
        }

        let frame = tokio::select! {
            _ = closed.changed() => break Ok(()),
            frame = read_frame(&mut reader, &mut buf) => frame,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        let request_id = frame.header.request_id();

        let reply = match Payload::from_frame(&frame) {
            Ok(Payload::Ping) => Payload::Pong,
            Ok(Payload::TransitionRequest(request)) => {
                match coordinator
                    .request_transition(
                        request.ride_id,
                        request.command,
                        actor,
                        request.expected_version,
                    )
                    .await
                {
                    Ok(ride) => Payload::TransitionAccepted(TransitionAccepted { ride }),
                    Err(e) => Payload::Error(e.to_error_payload()),
                }
            },
            Ok(Payload::Goodbye(_)) => {
                out.close(CloseReason::ClientLeave);
                break Ok(());
            },
            Ok(Payload::Join(_)) => Payload::Error(ErrorPayload::invalid_payload("already joined")),
            Ok(other) => Payload::Error(ErrorPayload::invalid_payload(format!(
                "unexpected {:?} frame from client",
                other.opcode()
            ))),
            Err(e) => Payload::Error(ErrorPayload::invalid_payload(e.to_string())),
        };

        if out.reply(reply.to_frame(request_id)?).await.is_err() {
            break Ok(());
        }
    };

    coordinator.leave(actor, session_id);

    let reason = out.close_reason();
    tracing::debug!(%actor, session_id, ?reason, "connection finished");
    if reason.is_none() {
        out.close(CloseReason::ClientLeave);
    }
    drop(out);
    let _ = writer_task.await;

    result
}

/// Read the `Join`. Anything else is answered with an error and ends the
/// connection.
async fn handshake<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    out: &FrameWriter,
) -> Result<Option<(Join, u32)>, ServerError>
where
    R: AsyncRead + Unpin + Send,
{
    let frame = match tokio::time::timeout(JOIN_TIMEOUT, read_frame(reader, buf)).await {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => return Ok(None),
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            tracing::debug!("no join within {JOIN_TIMEOUT:?}");
            return Ok(None);
        },
    };
    let request_id = frame.header.request_id();

    let error = match Payload::from_frame(&frame) {
        Ok(Payload::Join(join)) => return Ok(Some((join, request_id))),
        Ok(_) => ErrorPayload::not_joined(),
        Err(e) => ErrorPayload::invalid_payload(e.to_string()),
    };

    out.reply(Payload::Error(error).to_frame(request_id)?).await.ok();
    Ok(None)
}

/// Read one frame. `Ok(None)` on a clean end of stream before a header.
pub async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<Option<Frame>, ServerError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut header = [0u8; FrameHeader::SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let payload_size = FrameHeader::from_bytes(&header)?.payload_size() as usize;

    buf.clear();
    buf.extend_from_slice(&header);
    buf.resize(FrameHeader::SIZE + payload_size, 0);
    reader.read_exact(&mut buf[FrameHeader::SIZE..]).await?;

    Ok(Some(Frame::decode(buf)?))
}
