//! Per-transaction supervision: watches every topic, tracks which pipeline
//! stages have completed per correlation id, and detects terminal state.
//! The supervisor is an observer only; it never publishes and never
//! mutates events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;
use vigil_events::{Bus, Subscriber, SubscriptionHandle};
use vigil_protocol::{AlertChannel, Event, Payload, PublishError};
use vigil_topics as topics;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Idle time after which a context is considered terminal.
    pub context_ttl: Duration,
    /// How long a terminal context is kept around for late arrivals.
    pub grace: Duration,
    pub max_contexts: usize,
    pub sweep_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            context_ttl: Duration::from_secs(600),
            grace: Duration::from_secs(60),
            max_contexts: 100_000,
            sweep_interval: Duration::from_millis(500),
        }
    }
}

impl SupervisorConfig {
    pub fn from_core(cfg: &vigil_core::CoreConfig) -> Self {
        Self {
            context_ttl: Duration::from_millis(cfg.context_ttl_ms),
            ..Default::default()
        }
    }
}

/// Which stage markers have been observed for one correlation id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageSet {
    pub risk_evaluated: bool,
    pub compliance_decided: bool,
    pub action_applied: bool,
    pub narrated: bool,
}

impl StageSet {
    pub fn seen(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.risk_evaluated {
            out.push("risk_evaluated");
        }
        if self.compliance_decided {
            out.push("compliance_decided");
        }
        if self.action_applied {
            out.push("action_applied");
        }
        if self.narrated {
            out.push("narrated");
        }
        out
    }
}

struct ContextEntry {
    created_at: DateTime<Utc>,
    stages: StageSet,
    terminal: bool,
    terminal_since: Option<Instant>,
    last_event_time: DateTime<Utc>,
    last_event_instant: Instant,
}

/// Copied view returned to callers; the map itself is never exposed.
#[derive(Debug, Clone, Serialize)]
pub struct ContextStatus {
    pub correlation_id: String,
    pub stages: StageSet,
    pub stages_seen: Vec<&'static str>,
    #[serde(with = "vigil_protocol::ts_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "vigil_protocol::ts_millis")]
    pub last_event_time: DateTime<Utc>,
    pub terminal: bool,
}

struct SupervisorInner {
    contexts: Mutex<HashMap<String, ContextEntry>>,
    cfg: SupervisorConfig,
    stop: AtomicBool,
}

#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    pub fn new(cfg: SupervisorConfig) -> Self {
        let inner = Arc::new(SupervisorInner {
            contexts: Mutex::new(HashMap::new()),
            cfg,
            stop: AtomicBool::new(false),
        });
        // sweeper: ttl expiry, grace eviction, and the size cap
        let sweep = inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(sweep.cfg.sweep_interval).await;
                if sweep.stop.load(Ordering::SeqCst) {
                    break;
                }
                Self::sweep(&sweep);
            }
        });
        Self { inner }
    }

    /// Subscribe the supervisor to every topic on the bus.
    pub fn mount(&self, bus: &Bus) -> Result<Vec<SubscriptionHandle>, PublishError> {
        let mut handles = Vec::with_capacity(topics::ALL_TOPICS.len());
        for topic in topics::ALL_TOPICS {
            handles.push(bus.subscribe(topic, Arc::new(self.clone()))?);
        }
        Ok(handles)
    }

    /// Record one event. Creates the context lazily, applies stage
    /// markers, and flips terminal when the narrative lands.
    pub fn observe(&self, event: &Event) {
        let mut contexts = self.inner.contexts.lock().expect("context lock");
        if contexts.len() >= self.inner.cfg.max_contexts
            && !contexts.contains_key(&event.correlation_id)
        {
            evict_oldest(&mut contexts);
        }
        let now = Utc::now();
        let entry = contexts
            .entry(event.correlation_id.clone())
            .or_insert_with(|| ContextEntry {
                created_at: now,
                stages: StageSet::default(),
                terminal: false,
                terminal_since: None,
                last_event_time: now,
                last_event_instant: Instant::now(),
            });
        entry.last_event_time = now;
        entry.last_event_instant = Instant::now();

        match event.event_type.as_str() {
            topics::TOPIC_RISK_FLAGGED => entry.stages.risk_evaluated = true,
            topics::TOPIC_COMPLIANCE_ACTION => entry.stages.compliance_decided = true,
            topics::TOPIC_OPS_ACTION => entry.stages.action_applied = true,
            topics::TOPIC_OPS_ALERT => {
                if let Payload::OpsAlert(alert) = &event.payload {
                    if alert.channel() == AlertChannel::Narrative {
                        entry.stages.narrated = true;
                        if !entry.terminal {
                            entry.terminal = true;
                            entry.terminal_since = Some(Instant::now());
                            debug!(correlation_id = %event.correlation_id, "context narrated; terminal");
                        }
                    }
                }
            }
            _ => {}
        }
    }

    pub fn status(&self, correlation_id: &str) -> Option<ContextStatus> {
        let contexts = self.inner.contexts.lock().expect("context lock");
        contexts.get(correlation_id).map(|e| ContextStatus {
            correlation_id: correlation_id.to_string(),
            stages: e.stages,
            stages_seen: e.stages.seen(),
            created_at: e.created_at,
            last_event_time: e.last_event_time,
            terminal: e.terminal,
        })
    }

    /// Count of live, non-terminal contexts.
    pub fn pending(&self) -> usize {
        let contexts = self.inner.contexts.lock().expect("context lock");
        contexts.values().filter(|e| !e.terminal).count()
    }

    pub fn context_count(&self) -> usize {
        self.inner.contexts.lock().expect("context lock").len()
    }

    fn sweep(inner: &SupervisorInner) {
        let mut contexts = inner.contexts.lock().expect("context lock");
        let now = Instant::now();
        for entry in contexts.values_mut() {
            if !entry.terminal
                && now.saturating_duration_since(entry.last_event_instant) >= inner.cfg.context_ttl
            {
                entry.terminal = true;
                entry.terminal_since = Some(now);
            }
        }
        contexts.retain(|_, e| match (e.terminal, e.terminal_since) {
            (true, Some(since)) => now.saturating_duration_since(since) < inner.cfg.grace,
            _ => true,
        });
        while contexts.len() > inner.cfg.max_contexts {
            if !evict_oldest(&mut contexts) {
                break;
            }
        }
    }
}

fn evict_oldest(contexts: &mut HashMap<String, ContextEntry>) -> bool {
    let oldest = contexts
        .iter()
        .min_by_key(|(_, e)| e.last_event_instant)
        .map(|(k, _)| k.clone());
    match oldest {
        Some(key) => {
            contexts.remove(&key);
            true
        }
        None => false,
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // only signal the sweeper when this is the final handle
        if Arc::strong_count(&self.inner) == 1 {
            self.inner.stop.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Subscriber for Supervisor {
    fn name(&self) -> &str {
        "pipeline-supervisor"
    }

    async fn deliver(&self, event: Event) -> anyhow::Result<()> {
        self.observe(&event);
        Ok(())
    }
}
