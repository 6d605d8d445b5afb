use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

/// Per-agent counters mirroring what operators watch: invocation volume,
/// failures, duplicate skips, events emitted, cumulative processing time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentStat {
    pub invocations: u64,
    pub failures: u64,
    pub duplicates_skipped: u64,
    pub events_emitted: u64,
    pub total_processing_ms: u64,
}

/// Shared registry; one per process, handed to every harness.
#[derive(Clone, Default)]
pub struct AgentMetrics {
    inner: Arc<Mutex<HashMap<String, AgentStat>>>,
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_invocation(&self, agent: &str, elapsed: Duration, emitted: usize) {
        let mut map = self.inner.lock().expect("metrics lock");
        let stat = map.entry(agent.to_string()).or_default();
        stat.invocations += 1;
        stat.events_emitted += emitted as u64;
        stat.total_processing_ms += elapsed.as_millis() as u64;
    }

    pub fn record_failure(&self, agent: &str) {
        let mut map = self.inner.lock().expect("metrics lock");
        map.entry(agent.to_string()).or_default().failures += 1;
    }

    pub fn record_duplicate(&self, agent: &str) {
        let mut map = self.inner.lock().expect("metrics lock");
        map.entry(agent.to_string()).or_default().duplicates_skipped += 1;
    }

    pub fn snapshot(&self) -> HashMap<String, AgentStat> {
        self.inner.lock().expect("metrics lock").clone()
    }
}
