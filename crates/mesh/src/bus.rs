//! In-process message bus and per-agent mailboxes.
//!
//! The bus is an addressed, asynchronous point-to-point transport. It carries
//! encoded frames, so every hop goes through the same codec a networked
//! transport would use. Each agent owns one [`Mailbox`]; the bus only keeps
//! the sending half.
//!
//! # Guarantees
//!
//! - Per sender/receiver pair, frames arrive in send order
//! - No ordering across different senders
//! - Malformed frames are logged and dropped at the receiving mailbox

use crate::envelope::Envelope;
use crate::error::{MeshError, MeshResult};
use medfleet_core::AgentId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

type Route = mpsc::UnboundedSender<Vec<u8>>;

/// Shared address table; cheap to clone
#[derive(Debug, Clone, Default)]
pub struct MessageBus {
    routes: Arc<RwLock<HashMap<AgentId, Route>>>,
}

impl MessageBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return its mailbox
    ///
    /// Registering an id again replaces the previous route; the old mailbox
    /// then sees its channel close.
    pub async fn register(&self, id: impl Into<AgentId>) -> Mailbox {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self.routes.write().await.insert(id.clone(), tx);
        if previous.is_some() {
            warn!(agent = %id, "Mailbox re-registered, previous route replaced");
        }
        debug!(agent = %id, "Mailbox registered");
        Mailbox {
            id,
            rx,
            deferred: VecDeque::new(),
        }
    }

    /// Remove `id` from the address table
    pub async fn unregister(&self, id: &str) {
        self.routes.write().await.remove(id);
        debug!(agent = %id, "Mailbox unregistered");
    }

    /// Ids currently reachable
    pub async fn registered(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.routes.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Deliver an envelope to its receiver
    pub async fn send(&self, envelope: Envelope) -> MeshResult<()> {
        let frame = envelope.to_wire()?;
        self.send_frame(&envelope.receiver, frame).await?;
        debug!(
            from = %envelope.sender,
            to = %envelope.receiver,
            kind = %envelope.kind(),
            "Message sent"
        );
        Ok(())
    }

    /// Deliver a raw frame to `receiver`
    pub async fn send_frame(&self, receiver: &str, frame: Vec<u8>) -> MeshResult<()> {
        let routes = self.routes.read().await;
        let route = routes.get(receiver).ok_or_else(|| MeshError::PeerNotFound {
            peer_id: receiver.to_string(),
        })?;
        route.send(frame).map_err(|_| MeshError::Unreachable {
            peer_id: receiver.to_string(),
        })
    }
}

/// Outcome of a bounded receive
#[derive(Debug)]
pub enum Received {
    /// A decoded message
    Message(Envelope),
    /// The deadline passed first
    TimedOut,
    /// The mailbox has been unregistered
    Closed,
}

/// Receiving side owned by a single agent
#[derive(Debug)]
pub struct Mailbox {
    id: AgentId,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    deferred: VecDeque<Envelope>,
}

impl Mailbox {
    /// Owner id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next message from the channel, skipping malformed frames
    ///
    /// Ignores deferred messages. Returns `None` once the channel closes.
    /// Cancel-safe.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let frame = self.rx.recv().await?;
            if let Some(envelope) = self.decode(&frame) {
                return Some(envelope);
            }
        }
    }

    /// Like [`recv`](Self::recv) but gives up at `deadline`
    pub async fn recv_until(&mut self, deadline: Instant) -> Received {
        match tokio::time::timeout_at(deadline, self.recv()).await {
            Ok(Some(envelope)) => Received::Message(envelope),
            Ok(None) => Received::Closed,
            Err(_) => Received::TimedOut,
        }
    }

    /// Park a message for after the current exchange
    pub fn defer(&mut self, envelope: Envelope) {
        debug!(agent = %self.id, kind = %envelope.kind(), from = %envelope.sender, "Message deferred");
        self.deferred.push_back(envelope);
    }

    /// Next message, parked ones first
    pub async fn next(&mut self) -> Option<Envelope> {
        if let Some(envelope) = self.deferred.pop_front() {
            return Some(envelope);
        }
        self.recv().await
    }

    fn decode(&self, frame: &[u8]) -> Option<Envelope> {
        match Envelope::from_wire(frame) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                warn!(agent = %self.id, error = %e, "Dropping malformed frame");
                None
            }
        }
    }
}
