//! flockd - the flock node daemon.
//!
//! Every node runs the same process: an HTTP front that accepts
//! `/function/:name` calls, a resolver tracking locally runnable function
//! containers, a gossip-fed scheduler that picks an execution node per
//! request, and an offload protocol that realizes remote calls as a
//! request/response message pair correlated by request id.
//!
//! There is no central dispatcher. Each node derives its view of the fleet
//! from the shared `heartbeats` topic and schedules against that view;
//! divergence between nodes is expected and bounded by the tick periods.

pub mod heartbeat;
pub mod node;
pub mod offload;
pub mod remote;
pub mod resolver;
pub mod runtime;
pub mod scheduler;
pub mod server;
pub mod telemetry;

pub use node::{Node, NodeTiming};
pub use offload::OffloadTable;
pub use resolver::{Resolver, ResolverConfig};
pub use runtime::{ConfiguredRuntime, ContainerRecord, ContainerRuntime};
pub use scheduler::{LatencySample, ScheduleError, Scheduler, SchedulerConfig};
