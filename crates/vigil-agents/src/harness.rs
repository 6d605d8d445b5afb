use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};
use vigil_events::{Bus, Subscriber, SubscriptionHandle};
use vigil_protocol::{Event, PublishError};

use crate::{Agent, AgentMetrics};

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Handler deadline; exceeding it aborts the invocation and the bus
    /// retry policy takes over.
    pub handler_timeout: Duration,
    /// How many recently processed event ids to remember.
    pub dedup_window: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(30),
            dedup_window: 10_000,
        }
    }
}

/// Bounded set of recently seen event ids, evicting oldest-first.
struct DedupWindow {
    cap: usize,
    set: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupWindow {
    fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            set: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.set.contains(id)
    }

    fn insert(&mut self, id: String) {
        if self.set.contains(&id) {
            return;
        }
        if self.order.len() == self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        self.set.insert(id.clone());
        self.order.push_back(id);
    }
}

/// Wraps one agent for the bus: event-id dedup, timing, deadline, error
/// capture, and publication of emitted events. An agent subscribed to
/// several topics shares one harness, so its dedup window spans them all.
pub struct AgentHarness {
    agent: Arc<dyn Agent>,
    bus: Bus,
    seen: Mutex<DedupWindow>,
    metrics: AgentMetrics,
    cfg: HarnessConfig,
}

impl AgentHarness {
    /// Subscribe `agent` to all its topics through a fresh harness.
    pub fn mount(
        bus: &Bus,
        agent: Arc<dyn Agent>,
        cfg: HarnessConfig,
        metrics: AgentMetrics,
    ) -> Result<Vec<SubscriptionHandle>, PublishError> {
        let dedup = DedupWindow::new(cfg.dedup_window);
        let harness = Arc::new(Self {
            agent: agent.clone(),
            bus: bus.clone(),
            seen: Mutex::new(dedup),
            metrics,
            cfg,
        });
        agent
            .topics()
            .iter()
            .map(|topic| bus.subscribe(topic, harness.clone()))
            .collect()
    }
}

#[async_trait]
impl Subscriber for AgentHarness {
    fn name(&self) -> &str {
        self.agent.name()
    }

    async fn deliver(&self, event: Event) -> anyhow::Result<()> {
        let agent = self.agent.name();
        if self.seen.lock().expect("dedup lock").contains(&event.event_id) {
            self.metrics.record_duplicate(agent);
            debug!(agent, event_id = %event.event_id, "duplicate event id; skipping");
            return Ok(());
        }

        let span = info_span!("handle", agent, topic = %event.event_type, event_id = %event.event_id);
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.cfg.handler_timeout, self.agent.handle(&event))
            .instrument(span)
            .await;

        let emitted = match outcome {
            Err(_) => {
                self.metrics.record_failure(agent);
                anyhow::bail!(
                    "handler {agent} timed out after {} ms",
                    self.cfg.handler_timeout.as_millis()
                );
            }
            Ok(Err(e)) => {
                self.metrics.record_failure(agent);
                return Err(anyhow::Error::new(e).context(format!("handler {agent} raised")));
            }
            Ok(Ok(emitted)) => emitted,
        };

        let count = emitted.len();
        for mut out in emitted {
            // emitted events always inherit the input's correlation id
            out.correlation_id = event.correlation_id.clone();
            self.bus
                .publish(out)
                .await
                .map_err(|e| anyhow::anyhow!("publishing follow-on from {agent}: {e}"))?;
        }

        // only a fully processed event counts as seen; failed deliveries
        // must remain retryable
        self.seen
            .lock()
            .expect("dedup lock")
            .insert(event.event_id.clone());
        self.metrics
            .record_invocation(agent, started.elapsed(), count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AgentError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vigil_events::BusConfig;
    use vigil_protocol::{CustomerMessage, LogLine, Payload};
    use vigil_topics as topics;

    struct EchoAgent {
        calls: AtomicU32,
        slow: bool,
    }

    #[async_trait]
    impl Agent for EchoAgent {
        fn name(&self) -> &'static str {
            "echo-agent"
        }
        fn topics(&self) -> &'static [&'static str] {
            &[topics::TOPIC_CUSTOMER_MESSAGE]
        }
        async fn handle(&self, event: &Event) -> Result<Vec<Event>, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.slow {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(vec![Event::new(
                "overwritten-by-harness",
                self.name(),
                Payload::LogLine(LogLine {
                    source_component: "echo".into(),
                    line: "handled".into(),
                }),
            )])
        }
    }

    fn msg(cid: &str) -> Event {
        Event::new(
            cid,
            "test",
            Payload::CustomerMessage(CustomerMessage {
                customer_id: "c".into(),
                body: "hello".into(),
            }),
        )
    }

    #[tokio::test]
    async fn duplicate_event_ids_are_processed_once() {
        let bus = Bus::new(BusConfig::default());
        let agent = Arc::new(EchoAgent {
            calls: AtomicU32::new(0),
            slow: false,
        });
        let metrics = AgentMetrics::new();
        AgentHarness::mount(&bus, agent.clone(), HarnessConfig::default(), metrics.clone())
            .unwrap();

        let event = msg("c-1").with_event_id("fixed-id-1");
        bus.publish(event.clone()).await.unwrap();
        bus.publish(event).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
        let snap = metrics.snapshot();
        assert_eq!(snap["echo-agent"].invocations, 1);
        assert_eq!(snap["echo-agent"].duplicates_skipped, 1);
    }

    #[tokio::test]
    async fn emitted_events_inherit_correlation_id() {
        let bus = Bus::new(BusConfig::default());
        let agent = Arc::new(EchoAgent {
            calls: AtomicU32::new(0),
            slow: false,
        });
        AgentHarness::mount(
            &bus,
            agent,
            HarnessConfig::default(),
            AgentMetrics::new(),
        )
        .unwrap();

        struct Collect(Mutex<Vec<Event>>);
        #[async_trait]
        impl Subscriber for Collect {
            fn name(&self) -> &str {
                "collect"
            }
            async fn deliver(&self, event: Event) -> anyhow::Result<()> {
                self.0.lock().unwrap().push(event);
                Ok(())
            }
        }
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        bus.subscribe(topics::TOPIC_LOG_LINE, sink.clone()).unwrap();

        bus.publish(msg("c-corr")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let seen = sink.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].correlation_id, "c-corr");
        assert_eq!(seen[0].source, "echo-agent");
    }

    #[tokio::test]
    async fn timeout_is_captured_and_counts_as_failure() {
        let bus = Bus::new(BusConfig {
            retry_delays: vec![
                Duration::from_millis(5),
                Duration::from_millis(5),
                Duration::from_millis(5),
            ],
            ..Default::default()
        });
        let agent = Arc::new(EchoAgent {
            calls: AtomicU32::new(0),
            slow: true,
        });
        let metrics = AgentMetrics::new();
        AgentHarness::mount(
            &bus,
            agent,
            HarnessConfig {
                handler_timeout: Duration::from_millis(20),
                dedup_window: 16,
            },
            metrics.clone(),
        )
        .unwrap();

        bus.publish(msg("c-slow")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(metrics.snapshot()["echo-agent"].failures, 4);
        let letters = bus.dead_letters(topics::TOPIC_CUSTOMER_MESSAGE);
        assert_eq!(letters.len(), 1);
        assert!(letters[0].event.attempt >= 3);
        assert!(letters[0].reason.contains("timed out"));
    }

    #[test]
    fn dedup_window_evicts_oldest() {
        let mut window = DedupWindow::new(2);
        window.insert("a".into());
        window.insert("b".into());
        window.insert("c".into());
        assert!(!window.contains("a"));
        assert!(window.contains("b"));
        assert!(window.contains("c"));
        // re-inserting an existing id does not grow the window
        window.insert("c".into());
        assert_eq!(window.order.len(), 2);
    }
}
