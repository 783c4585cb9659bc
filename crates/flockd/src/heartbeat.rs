//! Heartbeat emitter.
//!
//! Every tick the node samples its resource usage, ensures its advertised
//! functions are reachable on their request/response topics, and publishes
//! a `Heartbeat` on the shared topic. Subscribing before the advertisement
//! closes the window where an early peer could address a function we are
//! not yet listening for.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use sysinfo::System;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use flockproto::{topics, Heartbeat};

use crate::node::Node;

/// Heartbeat cadence.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
        }
    }
}

/// Spawn the emitter loop.
pub fn spawn_emitter(
    node: Arc<Node>,
    config: HeartbeatConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Persistent across ticks: CPU usage is a delta between refreshes.
        let mut system = System::new();
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = beat(&node, &mut system).await {
                        warn!(error = %e, "heartbeat publish failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("heartbeat emitter stopped");
    })
}

async fn beat(node: &Node, system: &mut System) -> Result<()> {
    system.refresh_memory();
    system.refresh_cpu_usage();

    let used_mem = if system.total_memory() == 0 {
        0.0
    } else {
        system.used_memory() as f64 / system.total_memory() as f64 * 100.0
    };
    let used_cpu = system.global_cpu_usage() as f64;

    let functions = node.resolver.function_names();
    for function in &functions {
        node.bus.subscribe(&topics::requests(function)).await?;
        node.bus.subscribe(&topics::responses(function)).await?;
    }

    let heartbeat = Heartbeat {
        node_id: node.node_id.clone(),
        used_mem,
        used_cpu,
        functions,
    };
    let encoded = flockproto::encode(&heartbeat)?;
    node.bus
        .publish(topics::HEARTBEATS, Bytes::from(encoded))
        .await?;
    Ok(())
}
