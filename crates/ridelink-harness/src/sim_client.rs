//! Sans-IO client driven over turmoil TCP.
//!
//! Executes the client's `Send` actions on the stream and feeds frames read
//! back into it. Non-send actions are buffered so tests can wait for the one
//! they care about without losing the others.

use std::{
    collections::VecDeque,
    io::{self, ErrorKind},
    time::Duration,
};

use ridelink_client::{Client, ClientAction, ClientEvent};
use ridelink_proto::{Actor, RideCommand, RideId};
use ridelink_server::connection::read_frame;
use tokio::{
    io::{AsyncWriteExt, ReadHalf, WriteHalf},
    time::timeout,
};
use turmoil::net::TcpStream;

/// How long [`SimClient::until`] waits for the server by default.
const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// One actor connected to a [`SimServer`](crate::SimServer).
pub struct SimClient {
    client: Client,
    reader: ReadHalf<TcpStream>,
    writer: WriteHalf<TcpStream>,
    buf: Vec<u8>,
    actions: VecDeque<ClientAction>,
}

impl SimClient {
    /// Connect to `address` and start a session for `client`'s actor.
    ///
    /// Returns once the server's `Joined` arrived, so replayed events are
    /// already in [`actions`](Self::actions).
    pub async fn join(address: &str, client: Client) -> io::Result<Self> {
        let stream = TcpStream::connect(address).await?;
        let (reader, writer) = tokio::io::split(stream);

        let mut sim = Self { client, reader, writer, buf: Vec::new(), actions: VecDeque::new() };
        sim.handle(ClientEvent::Connect).await?;
        sim.until(|a| matches!(a, ClientAction::Joined { .. })).await?;
        Ok(sim)
    }

    /// Connect a client with fresh state for `actor`.
    pub async fn join_as(address: &str, actor: Actor) -> io::Result<Self> {
        Self::join(address, Client::new(actor)).await
    }

    /// The client state machine.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Drop the connection without a goodbye and hand back the client so it
    /// can reconnect with what it already knows.
    pub fn disconnect(mut self) -> Client {
        // Disconnected never errors.
        let _ = self.client.handle(ClientEvent::Disconnected);
        self.client
    }

    /// Non-send actions not yet taken by [`until`](Self::until).
    pub fn actions(&self) -> impl Iterator<Item = &ClientAction> {
        self.actions.iter()
    }

    /// Feed `event` to the client and execute its sends.
    pub async fn handle(&mut self, event: ClientEvent) -> io::Result<()> {
        let actions = self.client.handle(event).map_err(io::Error::other)?;
        for action in actions {
            match action {
                ClientAction::Send(frame) => {
                    let mut bytes = Vec::with_capacity(frame.encoded_len());
                    frame.encode(&mut bytes).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
                    self.writer.write_all(&bytes).await?;
                    self.writer.flush().await?;
                },
                other => self.actions.push_back(other),
            }
        }
        Ok(())
    }

    /// Ask for a transition on a tracked ride.
    pub async fn request(&mut self, ride_id: RideId, command: RideCommand) -> io::Result<()> {
        self.handle(ClientEvent::RequestTransition { ride_id, command }).await
    }

    /// Read from the server until an action matches `pred`, then take it.
    pub async fn until(&mut self, pred: impl Fn(&ClientAction) -> bool) -> io::Result<ClientAction> {
        self.until_within(DEFAULT_WAIT, pred).await
    }

    /// [`until`](Self::until) with an explicit virtual-time budget.
    pub async fn until_within(
        &mut self,
        wait: Duration,
        pred: impl Fn(&ClientAction) -> bool,
    ) -> io::Result<ClientAction> {
        loop {
            if let Some(pos) = self.actions.iter().position(&pred) {
                if let Some(action) = self.actions.remove(pos) {
                    return Ok(action);
                }
            }

            let frame = timeout(wait, read_frame(&mut self.reader, &mut self.buf))
                .await
                .map_err(|_| io::Error::new(ErrorKind::TimedOut, "no matching action"))?
                .map_err(io::Error::other)?
                .ok_or_else(|| io::Error::new(ErrorKind::UnexpectedEof, "server closed"))?;

            self.handle(ClientEvent::FrameReceived(frame)).await?;
        }
    }

    /// Read whatever the server sends within `wait`.
    pub async fn drain(&mut self, wait: Duration) -> io::Result<()> {
        loop {
            match timeout(wait, read_frame(&mut self.reader, &mut self.buf)).await {
                Err(_) | Ok(Ok(None)) => return Ok(()),
                Ok(Ok(Some(frame))) => self.handle(ClientEvent::FrameReceived(frame)).await?,
                Ok(Err(e)) => return Err(io::Error::other(e)),
            }
        }
    }

    /// Send a goodbye and close the stream.
    pub async fn leave(mut self) -> io::Result<Client> {
        self.handle(ClientEvent::Leave).await?;
        self.writer.shutdown().await?;
        Ok(self.client)
    }
}
