//! Container runtime seam.
//!
//! The resolver consumes the local container runtime through this trait;
//! containerd/CNI integration lives behind it as an external collaborator.
//! `ConfiguredRuntime` serves nodes running from a static function map
//! (the `[bootstrap.functions]` config section) and test topologies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Result;
use async_trait::async_trait;

/// Default port function containers listen on.
pub const DEFAULT_FUNCTION_PORT: u16 = 8080;

/// Raw facts about one function container, as reported by the runtime.
#[derive(Debug, Clone)]
pub struct ContainerRecord {
    pub name: String,
    pub image: String,
    /// All container labels; the resolver partitions these into labels
    /// and annotations.
    pub labels: HashMap<String, String>,
    /// Process environment as `KEY=VALUE` lines.
    pub env: Vec<String>,
    /// Mount destinations inside the container.
    pub mounts: Vec<String>,
    pub running: bool,
    pub pid: u32,
    pub ip: Option<String>,
    pub port: u16,
    pub created_at: SystemTime,
}

impl ContainerRecord {
    /// A minimal running record, as produced by configured (non-runtime)
    /// function entries.
    pub fn configured(name: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            image: String::new(),
            labels: HashMap::new(),
            env: Vec::new(),
            mounts: Vec::new(),
            running: true,
            pid: 0,
            ip: Some(ip.into()),
            port,
            created_at: SystemTime::now(),
        }
    }
}

/// Enumeration capability over the local function containers.
///
/// Implementations log and skip individually broken containers; a returned
/// error means the whole listing failed and the resolver keeps its current
/// view for one more cycle.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list(&self) -> Result<Vec<ContainerRecord>>;
}

/// Runtime backed by a static `name -> ip[:port]` map.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredRuntime {
    records: Vec<ContainerRecord>,
}

impl ConfiguredRuntime {
    /// Build from config entries of the form `name = "ip[:port]"`.
    /// A missing or unparsable port falls back to the default.
    pub fn from_entries<'a, I>(entries: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let records = entries
            .into_iter()
            .map(|(name, addr)| {
                let (ip, port) = split_addr(addr);
                ContainerRecord::configured(name.clone(), ip, port)
            })
            .collect();
        Arc::new(Self { records })
    }
}

#[async_trait]
impl ContainerRuntime for ConfiguredRuntime {
    async fn list(&self) -> Result<Vec<ContainerRecord>> {
        Ok(self.records.clone())
    }
}

fn split_addr(addr: &str) -> (String, u16) {
    match addr.rsplit_once(':') {
        Some((ip, port)) => match port.parse() {
            Ok(port) => (ip.to_string(), port),
            Err(_) => (addr.to_string(), DEFAULT_FUNCTION_PORT),
        },
        None => (addr.to_string(), DEFAULT_FUNCTION_PORT),
    }
}
