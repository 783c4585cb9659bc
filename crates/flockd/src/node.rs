//! Node assembly.
//!
//! Wires the capabilities (bus, runtime, blob store) to the core loops
//! (resolver refresh, scheduler ingest, pump, heartbeat emitter) and owns
//! the state the HTTP front dispatches against. One watch channel threads
//! through every loop; flipping it stops the node.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};

use flockcas::BlobStore;
use flockproto::{topics, GossipBus, GossipMessage};

use crate::heartbeat::{self, HeartbeatConfig};
use crate::offload::OffloadTable;
use crate::remote;
use crate::resolver::{Resolver, ResolverConfig};
use crate::runtime::ContainerRuntime;
use crate::scheduler::{LatencySample, Scheduler, SchedulerConfig};
use crate::server::OffloadConfig;

/// Depth of the dispatcher -> scheduler latency channel.
const LATENCY_CHANNEL_DEPTH: usize = 256;

/// Depth of the pump -> scheduler heartbeat channel.
const HEARTBEAT_CHANNEL_DEPTH: usize = 64;

/// All node cadences in one place; tests shrink these to milliseconds.
#[derive(Debug, Clone, Default)]
pub struct NodeTiming {
    pub resolver: ResolverConfig,
    pub scheduler: SchedulerConfig,
    pub heartbeat: HeartbeatConfig,
    pub offload: OffloadConfig,
}

/// Shared state of one flock node.
pub struct Node {
    pub node_id: String,
    pub bus: Arc<dyn GossipBus>,
    pub resolver: Arc<Resolver>,
    pub scheduler: Arc<Scheduler>,
    pub blobs: Arc<dyn BlobStore>,
    pub offloads: OffloadTable,
    pub latency_tx: mpsc::Sender<LatencySample>,
    pub client: reqwest::Client,
    pub offload: OffloadConfig,
}

impl Node {
    /// Start a node: spawn all background loops and return the shared
    /// handle the HTTP front serves from.
    pub async fn start(
        bus: Arc<dyn GossipBus>,
        inbound: mpsc::Receiver<GossipMessage>,
        runtime: Arc<dyn ContainerRuntime>,
        blobs: Arc<dyn BlobStore>,
        timing: NodeTiming,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<Self>> {
        let (latency_tx, latency_rx) = mpsc::channel(LATENCY_CHANNEL_DEPTH);
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(HEARTBEAT_CHANNEL_DEPTH);

        let scheduler = Scheduler::new(timing.scheduler);
        scheduler.run(latency_rx, heartbeat_rx, shutdown.clone());

        let resolver = Resolver::new(runtime, timing.resolver);
        // Prime the map so the first heartbeat already advertises.
        resolver.refresh().await;
        resolver.run(shutdown.clone());

        bus.subscribe(topics::HEARTBEATS)
            .await
            .context("joining heartbeats topic")?;

        let node = Arc::new(Node {
            node_id: bus.node_id().to_string(),
            bus,
            resolver,
            scheduler,
            blobs,
            offloads: OffloadTable::new(),
            latency_tx,
            client: reqwest::Client::new(),
            offload: timing.offload,
        });

        remote::spawn_pump(Arc::clone(&node), inbound, heartbeat_tx, shutdown.clone());
        heartbeat::spawn_emitter(Arc::clone(&node), timing.heartbeat, shutdown);

        Ok(node)
    }
}
