//! Resolver - tracks which functions are runnable on this node.
//!
//! A background sweep lists the runtime's containers every refresh tick and
//! upserts them with a TTL two cycles long. TTL-based upsert (rather than
//! wholesale replacement) means concurrent `resolve` calls never see a torn
//! map, and a transiently missed entry survives one cycle before dropping
//! out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::runtime::{ContainerRecord, ContainerRuntime};

/// Label keys with this prefix are surfaced as annotations.
pub const ANNOTATION_PREFIX: &str = "flock.annotations.";

/// Mounts under this path are function secrets.
pub const SECRET_MOUNT_PATH: &str = "/var/flock/secrets/";

/// Env key carrying the function's process line.
const PROCESS_ENV_KEY: &str = "fprocess";

/// One resolved function entry.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub image: String,
    pub ip: Option<String>,
    pub port: u16,
    pub replicas: u32,
    pub pid: u32,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub env: HashMap<String, String>,
    pub env_process: String,
    pub secrets: Vec<String>,
    pub created_at: SystemTime,
    pub expires_at: Instant,
}

/// Refresh cadence and entry TTL.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub refresh: Duration,
    pub ttl: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            refresh: Duration::from_secs(2),
            // Two refresh cycles of grace.
            ttl: Duration::from_secs(4),
        }
    }
}

/// Function name -> local container URL resolution.
pub struct Resolver {
    runtime: Arc<dyn ContainerRuntime>,
    functions: DashMap<String, Function>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: ResolverConfig) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            functions: DashMap::new(),
            config,
        })
    }

    /// Spawn the background refresh loop.
    pub fn run(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(resolver.config.refresh);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => resolver.refresh().await,
                    _ = shutdown.changed() => {
                        debug!("resolver refresh loop shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// URL of the most recent non-expired entry for `name`.
    pub fn resolve(&self, name: &str) -> Option<String> {
        let entry = self.functions.get(name)?;
        if entry.expires_at < Instant::now() {
            return None;
        }
        let ip = entry.ip.as_deref()?;
        Some(format!("http://{}:{}", ip, entry.port))
    }

    /// Names of runnable, non-expired functions (heartbeat advertisement).
    pub fn function_names(&self) -> Vec<String> {
        let now = Instant::now();
        self.functions
            .iter()
            .filter(|f| f.expires_at >= now && f.replicas > 0)
            .map(|f| f.name.clone())
            .collect()
    }

    /// One refresh cycle: upsert every listed container, then sweep
    /// expired entries.
    pub async fn refresh(&self) {
        let records = match self.runtime.list().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "listing function containers failed");
                return;
            }
        };

        let expires_at = Instant::now() + self.config.ttl;
        for record in records {
            let function = build_function(record, expires_at);
            self.functions.insert(function.name.clone(), function);
        }

        let now = Instant::now();
        self.functions.retain(|_, f| f.expires_at >= now);
    }
}

fn build_function(record: ContainerRecord, expires_at: Instant) -> Function {
    let (labels, annotations) = build_labels_and_annotations(record.labels);
    let (env, env_process) = read_env(&record.env);
    let secrets = read_secrets(&record.mounts);
    let replicas = if record.running { 1 } else { 0 };

    Function {
        name: record.name,
        image: record.image,
        ip: record.ip,
        port: record.port,
        replicas,
        pid: record.pid,
        labels,
        annotations,
        env,
        env_process,
        secrets,
        created_at: record.created_at,
        expires_at,
    }
}

/// Partition container labels into plain labels and annotations by the
/// fixed prefix.
fn build_labels_and_annotations(
    container_labels: HashMap<String, String>,
) -> (HashMap<String, String>, HashMap<String, String>) {
    let mut labels = HashMap::new();
    let mut annotations = HashMap::new();

    for (k, v) in container_labels {
        match k.strip_prefix(ANNOTATION_PREFIX) {
            Some(stripped) => {
                annotations.insert(stripped.to_string(), v);
            }
            None => {
                labels.insert(k, v);
            }
        }
    }

    (labels, annotations)
}

/// Split `KEY=VALUE` env lines into vars (excluding `PATH`) and the
/// function process line.
fn read_env(env: &[String]) -> (HashMap<String, String>, String) {
    let mut vars = HashMap::new();
    let mut process = String::new();

    for line in env {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key == "PATH" {
            continue;
        }
        if key == PROCESS_ENV_KEY {
            process = value.to_string();
            continue;
        }
        vars.insert(key.to_string(), value.to_string());
    }

    (vars, process)
}

/// Secret names from mount destinations under the well-known path.
fn read_secrets(mounts: &[String]) -> Vec<String> {
    mounts
        .iter()
        .filter_map(|dest| dest.strip_prefix(SECRET_MOUNT_PATH))
        .map(|name| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Runtime whose records tests mutate between refreshes.
    #[derive(Default)]
    struct FixtureRuntime {
        records: Mutex<Vec<ContainerRecord>>,
    }

    impl FixtureRuntime {
        fn set(&self, records: Vec<ContainerRecord>) {
            *self.records.lock().unwrap() = records;
        }
    }

    #[async_trait]
    impl ContainerRuntime for FixtureRuntime {
        async fn list(&self) -> Result<Vec<ContainerRecord>> {
            Ok(self.records.lock().unwrap().clone())
        }
    }

    fn short_config() -> ResolverConfig {
        ResolverConfig {
            refresh: Duration::from_millis(10),
            ttl: Duration::from_millis(40),
        }
    }

    #[test]
    fn partitions_labels_and_annotations() {
        let mut container_labels = HashMap::new();
        container_labels.insert("tier".to_string(), "edge".to_string());
        container_labels.insert(
            format!("{ANNOTATION_PREFIX}owner"),
            "imaging-team".to_string(),
        );

        let (labels, annotations) = build_labels_and_annotations(container_labels);
        assert_eq!(labels.get("tier"), Some(&"edge".to_string()));
        assert_eq!(annotations.get("owner"), Some(&"imaging-team".to_string()));
        assert!(!labels.contains_key(&format!("{ANNOTATION_PREFIX}owner")));
    }

    #[test]
    fn reads_env_excluding_path_and_process() {
        let env = vec![
            "PATH=/usr/bin".to_string(),
            "fprocess=./handler".to_string(),
            "MODE=fast".to_string(),
            "NOEQUALS".to_string(),
        ];
        let (vars, process) = read_env(&env);
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.get("MODE"), Some(&"fast".to_string()));
        assert_eq!(process, "./handler");
    }

    #[test]
    fn reads_secrets_from_mounts() {
        let mounts = vec![
            "/tmp/scratch".to_string(),
            format!("{SECRET_MOUNT_PATH}api-key"),
        ];
        assert_eq!(read_secrets(&mounts), vec!["api-key".to_string()]);
    }

    #[tokio::test]
    async fn resolves_running_entry() {
        let fixture = Arc::new(FixtureRuntime::default());
        fixture.set(vec![ContainerRecord::configured("echo", "10.0.0.7", 8080)]);
        let resolver = Resolver::new(fixture, short_config());

        resolver.refresh().await;
        assert_eq!(
            resolver.resolve("echo"),
            Some("http://10.0.0.7:8080".to_string())
        );
        assert_eq!(resolver.function_names(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn missed_entry_survives_one_cycle_then_expires() {
        let fixture = Arc::new(FixtureRuntime::default());
        fixture.set(vec![ContainerRecord::configured("echo", "10.0.0.7", 8080)]);
        let resolver = Resolver::new(Arc::clone(&fixture) as Arc<dyn ContainerRuntime>, short_config());

        resolver.refresh().await;
        fixture.set(vec![]);

        // Still within TTL: the entry keeps resolving.
        resolver.refresh().await;
        assert!(resolver.resolve("echo").is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        resolver.refresh().await;
        assert_eq!(resolver.resolve("echo"), None);
    }

    #[tokio::test]
    async fn expired_entry_is_unresolvable_before_the_sweep() {
        let fixture = Arc::new(FixtureRuntime::default());
        fixture.set(vec![ContainerRecord::configured("echo", "10.0.0.7", 8080)]);
        let resolver = Resolver::new(Arc::clone(&fixture) as Arc<dyn ContainerRuntime>, short_config());

        resolver.refresh().await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        // No sweep has run since expiry; resolve must still miss.
        assert_eq!(resolver.resolve("echo"), None);
        assert!(resolver.function_names().is_empty());
    }

    #[tokio::test]
    async fn stopped_container_is_not_advertised() {
        let fixture = Arc::new(FixtureRuntime::default());
        let mut record = ContainerRecord::configured("echo", "10.0.0.7", 8080);
        record.running = false;
        record.ip = None;
        fixture.set(vec![record]);
        let resolver = Resolver::new(fixture, short_config());

        resolver.refresh().await;
        assert!(resolver.function_names().is_empty());
        assert_eq!(resolver.resolve("echo"), None);
    }
}
