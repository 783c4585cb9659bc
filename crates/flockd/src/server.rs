//! HTTP front and dispatcher.
//!
//! Every `/function/:name` call is scheduled onto a node: ourselves (plain
//! HTTP pass-through to the local container) or a peer (offload over the
//! bus). Whichever way it goes, exactly one latency sample per scheduled
//! call is enqueued afterwards - the scheduler's inflight accounting
//! depends on that pairing.

use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

use flockproto::{topics, BusError, FunctionRequest, WireError};

use crate::node::Node;
use crate::offload::OffloadTable;
use crate::scheduler::LatencySample;

/// Request header marking the body as a CID to dereference on the
/// execution node.
pub const HEADER_IS_CID: &str = "Ipfaas-Is-Cid";

/// Request header asking the execution node to store the result and reply
/// with its CID.
pub const HEADER_PUBLISH_IPFS: &str = "Ipfaas-Publish-Ipfs";

/// Reserved header pair carrying the container's HTTP status across the
/// wire; popped before the response reaches the caller.
pub const HEADER_WIRE_STATUS: &str = "X-Flock-Status";

/// Cap on buffered request/response bodies.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Offload wait bound.
#[derive(Debug, Clone)]
pub struct OffloadConfig {
    pub timeout: Duration,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("resolving function: {0}")]
    NotResolvable(String),
    #[error("reading request body: {0}")]
    Body(String),
    #[error("calling function: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("encoding request: {0}")]
    Encode(#[from] WireError),
    #[error("bus: {0}")]
    Bus(#[from] BusError),
    #[error("offload timed out")]
    OffloadTimeout,
    #[error("offload reply channel closed")]
    OffloadDropped,
}

impl DispatchError {
    fn status(&self) -> StatusCode {
        match self {
            DispatchError::OffloadTimeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Build the node's HTTP router.
pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/function/{name}", any(dispatch_root))
        .route("/function/{name}/{*path}", any(dispatch_tail))
        .route("/healthz", get(healthz))
        .with_state(node)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn dispatch_root(
    State(node): State<Arc<Node>>,
    Path(name): Path<String>,
    req: Request<Body>,
) -> Response {
    dispatch(node, name, String::new(), req).await
}

async fn dispatch_tail(
    State(node): State<Arc<Node>>,
    Path((name, path)): Path<(String, String)>,
    req: Request<Body>,
) -> Response {
    dispatch(node, name, path, req).await
}

async fn dispatch(node: Arc<Node>, function_name: String, tail: String, req: Request<Body>) -> Response {
    if function_name.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "provide a function name in the request path",
        )
            .into_response();
    }

    let target = match node.scheduler.schedule(&function_name) {
        Ok(target) => target,
        Err(e) => {
            warn!(function = %function_name, error = %e, "request is not routable");
            return (StatusCode::BAD_GATEWAY, e.to_string()).into_response();
        }
    };

    // Exactly one sample per schedule, emitted on drop so it survives
    // errors and mid-request cancellation alike; the sample is what
    // decrements the inflight counter for the chosen key.
    let _sample = SampleOnExit::new(&node, target.clone(), function_name.clone());

    let result = if target == node.node_id {
        handle_local(&node, &function_name, &tail, req).await
    } else {
        handle_offload(&node, &function_name, &target, &tail, req).await
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            warn!(function = %function_name, node = %target, error = %e, "dispatch failed");
            (e.status(), e.to_string()).into_response()
        }
    }
}

/// Emits the latency sample for one scheduled call when dropped.
struct SampleOnExit {
    tx: tokio::sync::mpsc::Sender<LatencySample>,
    node_id: String,
    function_name: String,
    started: Instant,
}

impl SampleOnExit {
    fn new(node: &Node, node_id: String, function_name: String) -> Self {
        Self {
            tx: node.latency_tx.clone(),
            node_id,
            function_name,
            started: Instant::now(),
        }
    }
}

impl Drop for SampleOnExit {
    fn drop(&mut self) {
        let sample = LatencySample {
            node_id: mem::take(&mut self.node_id),
            function_name: mem::take(&mut self.function_name),
            value_micros: self.started.elapsed().as_micros() as i64,
        };
        if self.tx.try_send(sample).is_err() {
            warn!("latency channel unavailable; sample dropped");
        }
    }
}

/// Removes the rendezvous entry on every exit path, cancellation included.
struct Rendezvous<'a> {
    table: &'a OffloadTable,
    request_id: Uuid,
}

impl Drop for Rendezvous<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.request_id);
    }
}

/// Fast path: this node was scheduled, call the local container directly.
async fn handle_local(
    node: &Node,
    function_name: &str,
    tail: &str,
    req: Request<Body>,
) -> Result<Response, DispatchError> {
    let base = node
        .resolver
        .resolve(function_name)
        .ok_or_else(|| DispatchError::NotResolvable(function_name.to_string()))?;

    let method = req.method().clone();
    let query = req.uri().query().map(|q| q.to_string());
    let headers = req.headers().clone();
    let body = to_bytes(req.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| DispatchError::Body(e.to_string()))?;

    let url = join_url(&base, tail, query.as_deref());
    let mut outbound = node.client.request(method, url);
    for (name, value) in headers.iter() {
        if name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        outbound = outbound.header(name.clone(), value.clone());
    }

    let upstream = outbound.body(body).send().await?;

    // The container's status and headers pass through verbatim, 5xx
    // included.
    let status = upstream.status();
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if name == header::CONTENT_LENGTH || name == header::TRANSFER_ENCODING {
            continue;
        }
        response_headers.append(name.clone(), value.clone());
    }
    let body = upstream.bytes().await?;

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

/// Slow path: publish a `FunctionRequest` addressed to `target` and wait
/// on the rendezvous for the correlated reply.
async fn handle_offload(
    node: &Node,
    function_name: &str,
    target: &str,
    tail: &str,
    req: Request<Body>,
) -> Result<Response, DispatchError> {
    let is_cid = req.headers().contains_key(HEADER_IS_CID);
    let publish_ipfs = req.headers().contains_key(HEADER_PUBLISH_IPFS);
    let query = req.uri().query().unwrap_or("").to_string();
    let body = to_bytes(req.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| DispatchError::Body(e.to_string()))?;

    let request_id = Uuid::new_v4();
    let wire = FunctionRequest {
        function_name: function_name.to_string(),
        data: body.to_vec(),
        params: tail.to_string(),
        query,
        node_id: target.to_string(),
        request_id,
        is_cid,
        publish_ipfs,
    };
    let encoded = flockproto::encode(&wire)?;

    // Rendezvous registered before the publish, so the reply cannot race
    // past the registration; the guard clears the entry on every exit.
    let rx = node.offloads.register(request_id);
    let _rendezvous = Rendezvous {
        table: &node.offloads,
        request_id,
    };

    node.bus
        .subscribe(&topics::responses(function_name))
        .await?;
    node.bus
        .publish(&topics::requests(function_name), Bytes::from(encoded))
        .await?;

    let reply = match tokio::time::timeout(node.offload.timeout, rx).await {
        Err(_) => return Err(DispatchError::OffloadTimeout),
        Ok(Err(_)) => return Err(DispatchError::OffloadDropped),
        Ok(Ok(reply)) => reply,
    };

    let mut status = StatusCode::OK;
    let mut response_headers = HeaderMap::new();
    for (name, value) in &reply.header {
        if name.eq_ignore_ascii_case(HEADER_WIRE_STATUS) {
            if let Ok(code) = value.parse::<u16>() {
                status = StatusCode::from_u16(code).unwrap_or(StatusCode::OK);
            }
            continue;
        }
        if name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("transfer-encoding")
        {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) else {
            continue;
        };
        response_headers.append(name, value);
    }

    let mut response = Response::new(Body::from(reply.data));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

/// Assemble `base` + optional path tail + optional query string.
pub(crate) fn join_url(base: &str, tail: &str, query: Option<&str>) -> String {
    let mut url = base.to_string();
    if !tail.is_empty() {
        url.push('/');
        url.push_str(tail);
    }
    match query {
        Some(q) if !q.is_empty() => {
            url.push('?');
            url.push_str(q);
        }
        _ => {}
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_base_tail_and_query() {
        assert_eq!(join_url("http://10.0.0.7:8080", "", None), "http://10.0.0.7:8080");
        assert_eq!(
            join_url("http://10.0.0.7:8080", "thumb/64", None),
            "http://10.0.0.7:8080/thumb/64"
        );
        assert_eq!(
            join_url("http://10.0.0.7:8080", "thumb/64", Some("quality=80")),
            "http://10.0.0.7:8080/thumb/64?quality=80"
        );
        assert_eq!(
            join_url("http://10.0.0.7:8080", "", Some("")),
            "http://10.0.0.7:8080"
        );
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        assert_eq!(
            DispatchError::OffloadTimeout.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            DispatchError::NotResolvable("echo".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
