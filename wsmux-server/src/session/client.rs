//! Connection identity and outbound queues

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use wsmux_protocol::ServerMessage;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    /// Allocate the next identifier
    pub fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Client({})", self.0)
    }
}

/// Outcome of a non-blocking send to one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The queue is full; the connection is too slow to keep up
    Full,
    /// The receiving side has gone away
    Closed,
}

/// Sending half of a connection's bounded outbound queue
#[derive(Debug, Clone)]
pub struct ClientSender {
    id: ClientId,
    tx: mpsc::Sender<ServerMessage>,
}

impl ClientSender {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Queue a message without waiting
    pub fn try_deliver(&self, message: ServerMessage) -> Delivery {
        match self.tx.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Create a fresh connection queue with room for `capacity` messages
pub fn client_channel(capacity: usize) -> (ClientSender, mpsc::Receiver<ServerMessage>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sender = ClientSender {
        id: ClientId::next(),
        tx,
    };
    (sender, rx)
}
