//! Wire message types.
//!
//! Field names are normative: they are what peers match on, so renames here
//! are wire-breaking. `data` is raw bytes (or an ASCII CID string when the
//! matching `isCID` flag is set); `header` carries HTTP response headers as
//! ordered name/value pairs and is copied through verbatim.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An invocation request published on `<functionName>_requests`.
///
/// The topic is a broadcast; `nodeId` names the intended executor and every
/// other node drops the message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionRequest {
    #[serde(rename = "functionName")]
    pub function_name: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    /// URL path tail forwarded to the function container.
    pub params: String,
    /// Raw query string forwarded to the function container.
    pub query: String,
    #[serde(rename = "nodeId")]
    pub node_id: String,
    #[serde(rename = "requestId")]
    pub request_id: Uuid,
    /// `data` is a CID to fetch from the blob store before execution.
    #[serde(rename = "isCID")]
    pub is_cid: bool,
    /// Store the result in the blob store and reply with its CID.
    #[serde(rename = "publishIPFS")]
    pub publish_ipfs: bool,
}

/// A reply published on `<functionName>_responses`, correlated by `requestId`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionResponse {
    #[serde(rename = "functionName")]
    pub function_name: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    pub header: Vec<(String, String)>,
    #[serde(rename = "requestId")]
    pub request_id: Uuid,
    #[serde(rename = "isCID")]
    pub is_cid: bool,
}

/// Periodic node advertisement on the shared `heartbeats` topic.
///
/// Receivers treat heartbeats as advisory: each one is stored with a TTL and
/// an expired entry drops out of routing on the next scheduler tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Heartbeat {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    #[serde(rename = "usedMEM")]
    pub used_mem: f64,
    #[serde(rename = "usedCPU")]
    pub used_cpu: f64,
    pub functions: Vec<String>,
}
