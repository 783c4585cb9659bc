//! flockproto - Wire protocol for the flock gossip mesh
//!
//! This crate defines the messages exchanged between flock nodes over the
//! pub/sub fabric, the topic naming scheme, and the `GossipBus` capability
//! the daemon consumes. All messages travel as MessagePack maps with field
//! names on the wire, so heterogeneous node implementations can interop.

pub mod bus;
pub mod codec;
pub mod messages;
pub mod topics;

pub use bus::{BusError, GossipBus, GossipMessage, MemoryBus, MemoryHub};
pub use codec::{decode, encode, WireError};
pub use messages::{FunctionRequest, FunctionResponse, Heartbeat};
pub use topics::TopicKind;
