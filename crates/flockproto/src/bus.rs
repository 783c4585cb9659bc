//! GossipBus - the pub/sub capability flock nodes run on.
//!
//! The daemon consumes the transport through this narrow surface: join a
//! topic, publish bytes, and read one merged stream of inbound messages.
//! Gossip routing, peer discovery, and signing live behind the trait; the
//! in-process `MemoryHub` fabric provided here backs tests and
//! single-machine development.
//!
//! Delivery contract the daemon relies on:
//! - `from` is stamped by the transport with the publisher's node id;
//! - a published message reaches every subscriber of the topic, the
//!   publishing node included (handlers self-filter on `from`);
//! - `subscribe` is idempotent.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// One inbound pub/sub message, as seen on the merged stream.
#[derive(Debug, Clone)]
pub struct GossipMessage {
    pub topic: String,
    /// Node id of the publisher.
    pub from: String,
    pub data: Bytes,
}

/// Errors from the bus capability.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus is closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Topic join/publish capability plus local node identity.
#[async_trait]
pub trait GossipBus: Send + Sync {
    /// Stable identity of the local node on the mesh.
    fn node_id(&self) -> &str;

    /// Join a topic; messages start flowing into the merged stream.
    /// Joining an already-joined topic is a no-op.
    async fn subscribe(&self, topic: &str) -> Result<(), BusError>;

    /// Publish bytes to a topic.
    async fn publish(&self, topic: &str, data: Bytes) -> Result<(), BusError>;
}

struct Subscriber {
    tx: mpsc::Sender<GossipMessage>,
}

/// Shared in-process fabric connecting `MemoryBus` handles.
///
/// Clone-cheap; every node attached to the same hub sees the same topics.
#[derive(Clone, Default)]
pub struct MemoryHub {
    topics: Arc<DashMap<String, Vec<Subscriber>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A node's handle onto a `MemoryHub`.
pub struct MemoryBus {
    hub: MemoryHub,
    node_id: String,
    tx: mpsc::Sender<GossipMessage>,
    joined: DashMap<String, ()>,
}

/// Buffered depth of each node's merged inbound stream.
const MAILBOX_DEPTH: usize = 256;

impl MemoryBus {
    /// Attach a node to the hub. Returns the bus handle and the merged
    /// inbound stream for the node's pump loop.
    pub fn attach(
        hub: &MemoryHub,
        node_id: impl Into<String>,
    ) -> (Self, mpsc::Receiver<GossipMessage>) {
        let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
        (
            Self {
                hub: hub.clone(),
                node_id: node_id.into(),
                tx,
                joined: DashMap::new(),
            },
            rx,
        )
    }
}

#[async_trait]
impl GossipBus for MemoryBus {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        if self.joined.insert(topic.to_string(), ()).is_some() {
            return Ok(());
        }
        self.hub
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber {
                tx: self.tx.clone(),
            });
        tracing::debug!(topic, node = %self.node_id, "joined topic");
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Bytes) -> Result<(), BusError> {
        // Snapshot the fan-out list so no map guard is held across awaits.
        let targets: Vec<mpsc::Sender<GossipMessage>> = match self.hub.topics.get(topic) {
            Some(subs) => subs.iter().map(|s| s.tx.clone()).collect(),
            None => return Ok(()),
        };

        for tx in targets {
            let msg = GossipMessage {
                topic: topic.to_string(),
                from: self.node_id.clone(),
                data: data.clone(),
            };
            // A closed mailbox means the node is gone; drop it below.
            let _ = tx.send(msg).await;
        }

        if let Some(mut subs) = self.hub.topics.get_mut(topic) {
            subs.retain(|s| !s.tx.is_closed());
        }
        Ok(())
    }
}
