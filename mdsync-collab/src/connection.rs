//! Per-participant reader and writer.
//!
//! A connection owns its socket and its outbound queue. The reader forwards
//! every inbound frame to the hub; the writer drains the outbound queue to
//! the socket. They share nothing else.
//!
//! Teardown starts from either side. When the socket fails or closes, the
//! reader unregisters, the hub drops the queue sender, and the writer sends
//! a close frame and exits. When the hub drops the connection first
//! (eviction, rejected registration), the writer exits and the reader is
//! stopped with it; both socket halves are dropped and the transport
//! closes without waiting for the peer.

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::hub::{ConnectionId, Frame, HubHandle, Registration};
use crate::identity::ParticipantIdentity;

/// One participant's session, before it starts pumping.
pub struct Connection {
    id: ConnectionId,
    identity: ParticipantIdentity,
    outbound: mpsc::Receiver<Frame>,
}

impl Connection {
    /// Create a connection with a bounded outbound queue, plus the
    /// registration that hands the queue's sender to the hub.
    pub fn new(identity: ParticipantIdentity, capacity: usize) -> (Self, Registration) {
        let id = ConnectionId::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        let registration = Registration {
            id,
            identity: identity.clone(),
            outbound: outbound_tx,
        };
        let connection = Self {
            id,
            identity,
            outbound: outbound_rx,
        };
        (connection, registration)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &ParticipantIdentity {
        &self.identity
    }

    /// Register a freshly upgraded socket and pump it until it closes.
    pub async fn serve<S, E>(
        socket: S,
        identity: ParticipantIdentity,
        capacity: usize,
        hub: HubHandle,
    ) where
        S: Stream<Item = Result<Message, E>> + Sink<Message>,
        E: std::fmt::Display,
        <S as Sink<Message>>::Error: std::fmt::Display,
    {
        let (connection, registration) = Connection::new(identity, capacity);
        if let Err(e) = hub.register(registration).await {
            log::warn!("Cannot register {}: {e}", connection.identity.id);
            return;
        }
        connection.run(socket, hub).await;
    }

    /// Run reader and writer concurrently. Returns once the writer has
    /// finished; the socket is dropped on return.
    pub async fn run<S, E>(self, socket: S, hub: HubHandle)
    where
        S: Stream<Item = Result<Message, E>> + Sink<Message>,
        E: std::fmt::Display,
        <S as Sink<Message>>::Error: std::fmt::Display,
    {
        let Self { id, identity, outbound } = self;
        let (sink, stream) = socket.split();

        let reader = read_loop(stream, id, &hub);
        let writer = write_loop(sink, outbound);
        tokio::pin!(reader, writer);

        tokio::select! {
            _ = &mut reader => {
                let _ = hub.unregister(id).await;
                // Drains until the hub closes the queue
                (&mut writer).await;
            }
            _ = &mut writer => {
                log::debug!("Connection {id} released by the hub");
                // No-op if the hub already dropped it
                let _ = hub.unregister(id).await;
            }
        }
        log::debug!("Connection {id} ({}) closed", identity.id);
    }
}

/// Forward inbound frames to the hub until the socket closes or fails.
///
/// Frames are not inspected; the hub decides what is valid. The hand-off
/// waits while the hub's queue is full.
pub async fn read_loop<S, E>(mut stream: S, id: ConnectionId, hub: &HubHandle)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(message) = stream.next().await {
        let frame = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            // Pings are answered by the transport
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                log::debug!("Connection {id} sent close");
                break;
            }
            Err(e) => {
                log::debug!("Read error on {id}: {e}");
                break;
            }
        };

        if hub.forward(id, frame).await.is_err() {
            break;
        }
    }
}

/// Write queued frames in order. Sends a close frame once the hub closes
/// the queue; stops silently on the first write error.
pub async fn write_loop<K>(mut sink: K, mut outbound: mpsc::Receiver<Frame>)
where
    K: Sink<Message> + Unpin,
    K::Error: std::fmt::Display,
{
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
            log::debug!("Write failed: {e}");
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}
