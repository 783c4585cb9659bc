//! Inbound message pump and remote request execution.
//!
//! One pump task per node consumes the bus's merged stream and fans out by
//! topic family. Requests addressed to this node execute on their own
//! spawned task; responses complete the offload rendezvous; heartbeats
//! feed the scheduler. A node never handles its own broadcasts - the
//! transport stamps the origin and the pump filters on it.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use flockcas::ContentHash;
use flockproto::{
    decode, topics, BusError, FunctionRequest, FunctionResponse, GossipMessage, Heartbeat,
    TopicKind, WireError,
};

use crate::node::Node;
use crate::server::{join_url, HEADER_WIRE_STATUS};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("resolving function: {0}")]
    NotResolvable(String),
    #[error("request data is not a utf-8 cid")]
    CidNotUtf8,
    #[error("invalid cid in request data: {0}")]
    InvalidCid(#[from] flockcas::HashError),
    #[error("blob not found: {0}")]
    BlobMissing(String),
    #[error("blob store: {0}")]
    Blob(#[from] flockcas::BlobError),
    #[error("calling function: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("encoding response: {0}")]
    Encode(#[from] WireError),
    #[error("publishing response: {0}")]
    Publish(#[from] BusError),
}

/// Spawn the node's pump loop.
pub fn spawn_pump(
    node: Arc<Node>,
    mut inbound: mpsc::Receiver<GossipMessage>,
    heartbeat_tx: mpsc::Sender<Heartbeat>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = inbound.recv() => {
                    let Some(msg) = msg else { break };
                    handle_message(&node, &heartbeat_tx, msg).await;
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("pump loop stopped");
    })
}

async fn handle_message(node: &Arc<Node>, heartbeat_tx: &mpsc::Sender<Heartbeat>, msg: GossipMessage) {
    match topics::classify(&msg.topic) {
        TopicKind::Responses(_) => {
            if msg.from == node.node_id {
                return;
            }
            let response: FunctionResponse = match decode(&msg.data) {
                Ok(response) => response,
                Err(e) => {
                    warn!(topic = %msg.topic, error = %e, "dropping undecodable response");
                    return;
                }
            };
            if !node.offloads.complete(response) {
                // Duplicate, late after timeout, or addressed to a peer.
                debug!(topic = %msg.topic, "dropping orphan response");
            }
        }
        TopicKind::Requests(_) => {
            if msg.from == node.node_id {
                return;
            }
            let request: FunctionRequest = match decode(&msg.data) {
                Ok(request) => request,
                Err(e) => {
                    warn!(topic = %msg.topic, error = %e, "dropping undecodable request");
                    return;
                }
            };
            // The topic is a broadcast; only the intended executor acts.
            if request.node_id != node.node_id {
                return;
            }
            let node = Arc::clone(node);
            tokio::spawn(async move {
                let function = request.function_name.clone();
                let request_id = request.request_id;
                if let Err(e) = handle_function_request(node, request).await {
                    // No response is published on failure; the requester
                    // unwinds via its offload timeout.
                    warn!(
                        function = %function,
                        request_id = %request_id,
                        error = %e,
                        "inbound invocation failed"
                    );
                }
            });
        }
        TopicKind::Heartbeats => {
            let heartbeat: Heartbeat = match decode(&msg.data) {
                Ok(heartbeat) => heartbeat,
                Err(e) => {
                    warn!(error = %e, "dropping undecodable heartbeat");
                    return;
                }
            };
            // Our own heartbeat is ingested too: a node is a routing
            // candidate for its own functions.
            if heartbeat_tx.send(heartbeat).await.is_err() {
                warn!("heartbeat channel closed");
            }
        }
        TopicKind::Other(topic) => {
            debug!(topic, "ignoring message on unclassified topic");
        }
    }
}

/// Execute a request another node offloaded to us and publish the reply.
pub(crate) async fn handle_function_request(
    node: Arc<Node>,
    req: FunctionRequest,
) -> Result<(), RemoteError> {
    let base = node
        .resolver
        .resolve(&req.function_name)
        .ok_or_else(|| RemoteError::NotResolvable(req.function_name.clone()))?;

    let mut data = req.data;
    if req.is_cid {
        let cid_str = std::str::from_utf8(&data).map_err(|_| RemoteError::CidNotUtf8)?;
        let cid = ContentHash::from_str_checked(cid_str.trim())?;
        data = node
            .blobs
            .get(&cid)?
            .ok_or_else(|| RemoteError::BlobMissing(cid.into_inner()))?;
    }

    let query = (!req.query.is_empty()).then_some(req.query.as_str());
    let url = join_url(&base, &req.params, query);
    let upstream = node.client.post(url).body(data).send().await?;

    let status = upstream.status();
    let mut header = vec![(HEADER_WIRE_STATUS.to_string(), status.as_u16().to_string())];
    for (name, value) in upstream.headers() {
        header.push((
            name.to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        ));
    }

    let mut body = upstream.bytes().await?.to_vec();
    let mut is_cid = false;
    if req.publish_ipfs {
        let cid = node.blobs.put(&body)?;
        body = cid.into_inner().into_bytes();
        is_cid = true;
    }

    let response = FunctionResponse {
        function_name: req.function_name.clone(),
        data: body,
        header,
        request_id: req.request_id,
        is_cid,
    };
    let encoded = flockproto::encode(&response)?;
    node.bus
        .publish(&topics::responses(&req.function_name), Bytes::from(encoded))
        .await?;

    debug!(
        function = %req.function_name,
        request_id = %req.request_id,
        status = status.as_u16(),
        "served offloaded invocation"
    );
    Ok(())
}
