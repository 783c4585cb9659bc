//! Scheduler - picks an execution node per function call.
//!
//! State is derived entirely from two inbound streams: latency samples from
//! the local dispatcher and heartbeats gossiped by the fleet (our own
//! included). Selection is power-of-two-choices over `ewma × inflight`
//! load, which approximates queued service time: a fast function with many
//! outstanding calls is penalized just like a slow idle one. A candidate
//! with no recorded latency has load zero, so cold nodes get explored
//! until their first sample lands.
//!
//! Hard contract with callers: every `schedule` that returns a node must be
//! followed by exactly one latency sample for that `(node, function)` key,
//! on success and failure alike. The sample is what returns the inflight
//! counter to balance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use flockproto::Heartbeat;

/// One observed invocation latency, emitted by the dispatcher per call.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    pub node_id: String,
    pub function_name: String,
    pub value_micros: i64,
}

/// Scheduler cadences.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Routing table rebuild period.
    pub routing_tick: Duration,
    /// How long a received heartbeat keeps a node routable.
    pub heartbeat_ttl: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            routing_tick: Duration::from_secs(3),
            heartbeat_ttl: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("function not found: {0}")]
    FunctionNotFound(String),
}

/// Decay age for the latency moving average.
const EWMA_AGE: f64 = 10.0;

/// Exponential moving average; the first sample seeds the average so a
/// cold key never reports a phantom zero once it has been observed.
#[derive(Debug, Clone, Copy, Default)]
struct Ewma {
    avg: f64,
    seeded: bool,
}

impl Ewma {
    fn add(&mut self, value: f64) {
        if self.seeded {
            let alpha = 2.0 / (EWMA_AGE + 1.0);
            self.avg += alpha * (value - self.avg);
        } else {
            self.avg = value;
            self.seeded = true;
        }
    }

    fn value(&self) -> f64 {
        self.avg
    }
}

type LoadKey = (String, String);

struct StoredHeartbeat {
    heartbeat: Heartbeat,
    expires_at: Instant,
}

/// Load-aware, gossip-driven scheduler.
pub struct Scheduler {
    /// Latest EWMA value per (node, function); written only by the
    /// latency ingest loop.
    latencies: DashMap<LoadKey, f64>,
    /// Outstanding dispatches per (node, function). Advisory; clamped at
    /// zero on stray decrements.
    inflight: DashMap<LoadKey, i64>,
    /// Last heartbeat per node, with expiry.
    heartbeats: Mutex<HashMap<String, StoredHeartbeat>>,
    /// function -> candidate nodes, swapped wholesale every tick.
    routes: RwLock<HashMap<String, Vec<String>>>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            latencies: DashMap::new(),
            inflight: DashMap::new(),
            heartbeats: Mutex::new(HashMap::new()),
            routes: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// Spawn the ingest and routing-rebuild loops.
    pub fn run(
        self: &Arc<Self>,
        mut latency_rx: mpsc::Receiver<LatencySample>,
        mut heartbeat_rx: mpsc::Receiver<Heartbeat>,
        shutdown: watch::Receiver<bool>,
    ) {
        // Latency ingest: single consumer, so samples for a given key are
        // processed in arrival order. The EWMA accumulators stay local to
        // the loop; only the current averages are shared.
        let scheduler = Arc::clone(self);
        let mut latency_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ewmas: HashMap<LoadKey, Ewma> = HashMap::new();
            loop {
                tokio::select! {
                    sample = latency_rx.recv() => {
                        let Some(sample) = sample else { break };
                        scheduler.ingest_latency(&mut ewmas, sample);
                    }
                    _ = latency_shutdown.changed() => break,
                }
            }
            debug!("latency ingest loop stopped");
        });

        // Heartbeat ingest.
        let scheduler = Arc::clone(self);
        let mut heartbeat_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    heartbeat = heartbeat_rx.recv() => {
                        let Some(heartbeat) = heartbeat else { break };
                        scheduler.ingest_heartbeat(heartbeat);
                    }
                    _ = heartbeat_shutdown.changed() => break,
                }
            }
            debug!("heartbeat ingest loop stopped");
        });

        // Routing rebuild tick.
        let scheduler = Arc::clone(self);
        let mut tick_shutdown = shutdown;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.config.routing_tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.rebuild_routes(),
                    _ = tick_shutdown.changed() => break,
                }
            }
            debug!("routing rebuild loop stopped");
        });
    }

    /// Pick an execution node for `function_name` and account one inflight
    /// dispatch against it. Never blocks.
    pub fn schedule(&self, function_name: &str) -> Result<String, ScheduleError> {
        let chosen = {
            let routes = self.routes.read().unwrap();
            let nodes = routes
                .get(function_name)
                .filter(|nodes| !nodes.is_empty())
                .ok_or_else(|| ScheduleError::FunctionNotFound(function_name.to_string()))?;

            if nodes.len() == 1 {
                nodes[0].clone()
            } else {
                let mut rng = rand::thread_rng();
                let first = rng.gen_range(0..nodes.len());
                let mut second = rng.gen_range(0..nodes.len());
                while second == first {
                    second = rng.gen_range(0..nodes.len());
                }

                let first_load = self.load(&nodes[first], function_name);
                let second_load = self.load(&nodes[second], function_name);

                // Ties go to the first draw.
                if second_load < first_load {
                    nodes[second].clone()
                } else {
                    nodes[first].clone()
                }
            }
        };

        *self
            .inflight
            .entry((chosen.clone(), function_name.to_string()))
            .or_insert(0) += 1;

        Ok(chosen)
    }

    /// Estimated queued service time for a candidate; zero when either
    /// factor has never been observed.
    fn load(&self, node_id: &str, function_name: &str) -> f64 {
        let key = (node_id.to_string(), function_name.to_string());
        let avg = self.latencies.get(&key).map(|v| *v).unwrap_or(0.0);
        let outstanding = self.inflight.get(&key).map(|v| *v).unwrap_or(0);
        avg * outstanding as f64
    }

    fn ingest_latency(&self, ewmas: &mut HashMap<LoadKey, Ewma>, sample: LatencySample) {
        let key = (sample.node_id, sample.function_name);

        let ewma = ewmas.entry(key.clone()).or_default();
        ewma.add(sample.value_micros as f64);
        self.latencies.insert(key.clone(), ewma.value());

        // The paired decrement for the schedule that produced this sample.
        // Clamped: a stray sample must not drive the counter negative.
        self.inflight
            .entry(key)
            .and_modify(|v| *v = (*v - 1).max(0));
    }

    fn ingest_heartbeat(&self, heartbeat: Heartbeat) {
        let expires_at = Instant::now() + self.config.heartbeat_ttl;
        let mut heartbeats = self.heartbeats.lock().unwrap();
        // Overwriting an older heartbeat for the node is the intent.
        heartbeats.insert(
            heartbeat.node_id.clone(),
            StoredHeartbeat {
                heartbeat,
                expires_at,
            },
        );
    }

    /// Rebuild the routing table from current non-expired heartbeats and
    /// swap it in. Readers see the old table or the new one, never a
    /// partial rebuild.
    fn rebuild_routes(&self) {
        let now = Instant::now();
        let mut table: HashMap<String, Vec<String>> = HashMap::new();

        {
            let mut heartbeats = self.heartbeats.lock().unwrap();
            heartbeats.retain(|_, stored| stored.expires_at >= now);
            for stored in heartbeats.values() {
                for function in &stored.heartbeat.functions {
                    table
                        .entry(function.clone())
                        .or_default()
                        .push(stored.heartbeat.node_id.clone());
                }
            }
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            for entry in self.inflight.iter() {
                let (node, function) = entry.key();
                debug!(node, function, inflight = *entry.value(), "load state");
            }
            for entry in self.latencies.iter() {
                let (node, function) = entry.key();
                debug!(node, function, ewma_micros = *entry.value(), "load state");
            }
        }

        *self.routes.write().unwrap() = table;
    }

    /// Current candidate set for a function (diagnostics and tests).
    pub fn candidates(&self, function_name: &str) -> Vec<String> {
        self.routes
            .read()
            .unwrap()
            .get(function_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Current inflight count for a `(node, function)` key.
    pub fn inflight_count(&self, node_id: &str, function_name: &str) -> i64 {
        self.inflight
            .get(&(node_id.to_string(), function_name.to_string()))
            .map(|v| *v)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn heartbeat(node: &str, functions: &[&str]) -> Heartbeat {
        Heartbeat {
            node_id: node.to_string(),
            used_mem: 10.0,
            used_cpu: 5.0,
            functions: functions.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn sample(node: &str, function: &str, micros: i64) -> LatencySample {
        LatencySample {
            node_id: node.to_string(),
            function_name: function.to_string(),
            value_micros: micros,
        }
    }

    fn scheduler_with(heartbeats: &[Heartbeat]) -> Arc<Scheduler> {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        for hb in heartbeats {
            scheduler.ingest_heartbeat(hb.clone());
        }
        scheduler.rebuild_routes();
        scheduler
    }

    #[test]
    fn unknown_function_is_not_routable() {
        let scheduler = scheduler_with(&[heartbeat("a", &["echo"])]);
        assert!(matches!(
            scheduler.schedule("sum"),
            Err(ScheduleError::FunctionNotFound(_))
        ));
    }

    #[test]
    fn single_candidate_short_circuits() {
        let scheduler = scheduler_with(&[heartbeat("a", &["echo"])]);
        assert_eq!(scheduler.schedule("echo").unwrap(), "a");
        assert_eq!(scheduler.inflight_count("a", "echo"), 1);
    }

    #[test]
    fn two_candidates_prefer_the_lower_load() {
        let scheduler = scheduler_with(&[heartbeat("a", &["sum"]), heartbeat("b", &["sum"])]);
        let mut ewmas = HashMap::new();

        // Five unanswered dispatches against a, each ~10ms.
        for _ in 0..5 {
            *scheduler
                .inflight
                .entry(("a".to_string(), "sum".to_string()))
                .or_insert(0) += 1;
        }
        scheduler.ingest_latency(&mut ewmas, sample("a", "sum", 10_000));
        *scheduler
            .inflight
            .entry(("a".to_string(), "sum".to_string()))
            .or_insert(0) += 1;
        // b is equally fast but idle.
        scheduler.ingest_latency(&mut ewmas, sample("b", "sum", 10_000));

        // On a two-node set, power-of-two degenerates to "compare both".
        for _ in 0..20 {
            let chosen = scheduler.schedule("sum").unwrap();
            assert_eq!(chosen, "b");
            scheduler.ingest_latency(&mut ewmas, sample("b", "sum", 10_000));
        }
    }

    #[test]
    fn never_sampled_candidate_is_explored_first() {
        let scheduler = scheduler_with(&[heartbeat("warm", &["f"]), heartbeat("cold", &["f"])]);
        let mut ewmas = HashMap::new();

        *scheduler
            .inflight
            .entry(("warm".to_string(), "f".to_string()))
            .or_insert(0) += 3;
        scheduler.ingest_latency(&mut ewmas, sample("warm", "f", 2_000));

        let chosen = scheduler.schedule("f").unwrap();
        assert_eq!(chosen, "cold");
    }

    #[test]
    fn latency_sample_decrements_inflight_clamped_at_zero() {
        let scheduler = scheduler_with(&[heartbeat("a", &["echo"])]);
        let mut ewmas = HashMap::new();

        scheduler.schedule("echo").unwrap();
        scheduler.ingest_latency(&mut ewmas, sample("a", "echo", 500));
        assert_eq!(scheduler.inflight_count("a", "echo"), 0);

        // A stray extra sample must clamp, not go negative.
        scheduler.ingest_latency(&mut ewmas, sample("a", "echo", 500));
        assert_eq!(scheduler.inflight_count("a", "echo"), 0);
    }

    #[test]
    fn schedules_and_samples_balance_out() {
        let scheduler = scheduler_with(&[heartbeat("a", &["echo"])]);
        let mut ewmas = HashMap::new();

        for _ in 0..7 {
            scheduler.schedule("echo").unwrap();
        }
        assert_eq!(scheduler.inflight_count("a", "echo"), 7);
        for _ in 0..7 {
            scheduler.ingest_latency(&mut ewmas, sample("a", "echo", 1_000));
        }
        assert_eq!(scheduler.inflight_count("a", "echo"), 0);
    }

    #[test]
    fn expired_heartbeat_drops_out_of_routing() {
        let scheduler = Scheduler::new(SchedulerConfig {
            routing_tick: Duration::from_millis(10),
            heartbeat_ttl: Duration::from_millis(20),
        });
        scheduler.ingest_heartbeat(heartbeat("a", &["echo"]));
        scheduler.rebuild_routes();
        assert_eq!(scheduler.candidates("echo"), vec!["a".to_string()]);

        std::thread::sleep(Duration::from_millis(30));
        scheduler.rebuild_routes();
        assert!(scheduler.candidates("echo").is_empty());
        assert!(scheduler.schedule("echo").is_err());
    }

    #[test]
    fn fresh_heartbeat_overwrites_older_one() {
        let scheduler = scheduler_with(&[heartbeat("a", &["old"])]);
        assert_eq!(scheduler.candidates("old"), vec!["a".to_string()]);

        scheduler.ingest_heartbeat(heartbeat("a", &["new"]));
        scheduler.rebuild_routes();
        assert!(scheduler.candidates("old").is_empty());
        assert_eq!(scheduler.candidates("new"), vec!["a".to_string()]);
    }

    #[test]
    fn ewma_follows_the_recent_signal() {
        let mut ewma = Ewma::default();
        ewma.add(1_000.0);
        assert_eq!(ewma.value(), 1_000.0);

        for _ in 0..50 {
            ewma.add(5_000.0);
        }
        assert!((ewma.value() - 5_000.0).abs() < 50.0);
    }
}
