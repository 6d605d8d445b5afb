//! Topic-addressed pub/sub with per-subscriber workers, bounded queues,
//! retry + dead-letter, replay, and a best-effort remote/fallback transport
//! chain. Local delivery is never affected by remote trouble.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vigil_protocol::{new_event_id, Event, PublishError};

mod dead_letter;
#[cfg(feature = "nats")]
mod nats;
mod transport;

pub use dead_letter::{DeadLetter, DeadLetterStore};
#[cfg(feature = "nats")]
pub use nats::NatsTransport;
pub use transport::{FallbackTransport, RemoteTransport, TransportError};

/// A mounted handler. The bus owns one worker per subscription and invokes
/// `deliver` sequentially, so implementations see FIFO order per topic.
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, event: Event) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub queue_depth: usize,
    pub backpressure_deadline: Duration,
    /// Redelivery schedule after a failed delivery; `attempt` increments
    /// once per step. Exhausting it dead-letters the event.
    pub retry_delays: Vec<Duration>,
    pub dead_letter_cap: usize,
    pub replay_cap: usize,
    /// When set, dead letters are appended here as JSONL on shutdown.
    pub dead_letter_dump: Option<PathBuf>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_depth: 1024,
            backpressure_deadline: Duration::from_secs(2),
            retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(30),
            ],
            dead_letter_cap: 10_000,
            replay_cap: 1024,
            dead_letter_dump: None,
        }
    }
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    backpressure_rejects: AtomicU64,
    remote_failures: AtomicU64,
    fallback_failures: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub dead_letter_evicted: u64,
    pub backpressure_rejects: u64,
    pub remote_failures: u64,
    pub fallback_failures: u64,
    pub subscriptions: usize,
}

struct SubEntry {
    id: u64,
    name: String,
    tx: mpsc::Sender<Event>,
    worker: JoinHandle<()>,
}

/// Returned by `subscribe`; pass back to `unsubscribe`.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    topic: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

struct BusInner {
    cfg: BusConfig,
    subs: RwLock<HashMap<String, Vec<SubEntry>>>,
    counters: Arc<Counters>,
    replay: Mutex<VecDeque<Event>>,
    dead_letters: DeadLetterStore,
    closed: AtomicBool,
    next_sub_id: AtomicU64,
    remote: Option<Arc<dyn RemoteTransport>>,
    fallback: Option<Arc<dyn FallbackTransport>>,
}

#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    pub fn new(cfg: BusConfig) -> Self {
        Self::with_transports(cfg, None, None)
    }

    pub fn with_transports(
        cfg: BusConfig,
        remote: Option<Arc<dyn RemoteTransport>>,
        fallback: Option<Arc<dyn FallbackTransport>>,
    ) -> Self {
        let dead_letters = DeadLetterStore::new(cfg.dead_letter_cap);
        Self {
            inner: Arc::new(BusInner {
                dead_letters,
                counters: Arc::new(Counters::default()),
                subs: RwLock::new(HashMap::new()),
                replay: Mutex::new(VecDeque::with_capacity(cfg.replay_cap)),
                closed: AtomicBool::new(false),
                next_sub_id: AtomicU64::new(1),
                remote,
                fallback,
                cfg,
            }),
        }
    }

    /// Register a handler for one topic. Applies only to events published
    /// after this call returns.
    pub fn subscribe(
        &self,
        topic: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<SubscriptionHandle, PublishError> {
        if !vigil_topics::is_known_topic(topic) {
            return Err(PublishError::UnknownType(topic.to_string()));
        }
        let (tx, rx) = mpsc::channel(self.inner.cfg.queue_depth);
        let id = self.inner.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let ctx = WorkerCtx {
            topic: topic.to_string(),
            retry_delays: self.inner.cfg.retry_delays.clone(),
            counters: self.inner.counters.clone(),
            dead_letters: self.inner.dead_letters.clone(),
        };
        let name = subscriber.name().to_string();
        let worker = tokio::spawn(run_worker(subscriber, rx, ctx));
        self.inner
            .subs
            .write()
            .expect("subscription lock")
            .entry(topic.to_string())
            .or_default()
            .push(SubEntry {
                id,
                name,
                tx,
                worker,
            });
        Ok(SubscriptionHandle {
            topic: topic.to_string(),
            id,
        })
    }

    /// Idempotent. The worker drains its queue and exits once its sender
    /// is gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut subs = self.inner.subs.write().expect("subscription lock");
        if let Some(entries) = subs.get_mut(&handle.topic) {
            entries.retain(|e| e.id != handle.id);
        }
    }

    /// Validate, stamp, enqueue locally, then forward best-effort to the
    /// remote transports. Returns the effective event id.
    pub async fn publish(&self, mut event: Event) -> Result<String, PublishError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PublishError::ShuttingDown);
        }
        if !vigil_topics::is_known_topic(&event.event_type) {
            return Err(PublishError::UnknownType(event.event_type));
        }
        if !event.is_coherent() {
            return Err(PublishError::PayloadMismatch {
                declared: event.event_type.clone(),
                actual: event.payload.topic().to_string(),
            });
        }
        if event.event_id.is_empty() {
            event.event_id = new_event_id();
        }
        event.timestamp = Utc::now();
        self.inner.counters.published.fetch_add(1, Ordering::Relaxed);

        {
            let mut replay = self.inner.replay.lock().expect("replay lock");
            if replay.len() == self.inner.cfg.replay_cap {
                replay.pop_front();
            }
            replay.push_back(event.clone());
        }

        let targets = self.targets_for(&event.event_type);
        for (name, tx) in targets {
            match tx
                .send_timeout(event.clone(), self.inner.cfg.backpressure_deadline)
                .await
            {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    self.inner
                        .counters
                        .backpressure_rejects
                        .fetch_add(1, Ordering::Relaxed);
                    return Err(PublishError::Backpressure {
                        topic: event.event_type.clone(),
                        subscriber: name,
                    });
                }
                // subscriber unsubscribed between the table read and the send
                Err(SendTimeoutError::Closed(_)) => {}
            }
        }

        self.forward_remote(event.clone());
        Ok(event.event_id)
    }

    fn targets_for(&self, topic: &str) -> Vec<(String, mpsc::Sender<Event>)> {
        self.inner
            .subs
            .read()
            .expect("subscription lock")
            .get(topic)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| (e.name.clone(), e.tx.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remote chain: try the managed bus with a small retry budget, fall
    /// back to the notification channel, and never touch local delivery.
    fn forward_remote(&self, event: Event) {
        if self.inner.remote.is_none() && self.inner.fallback.is_none() {
            return;
        }
        let remote = self.inner.remote.clone();
        let fallback = self.inner.fallback.clone();
        let counters = self.inner.counters.clone();
        tokio::spawn(async move {
            let mut remote_ok = false;
            if let Some(remote) = remote {
                for delay_ms in [0u64, 250, 1000] {
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                    match remote.put_events(std::slice::from_ref(&event)).await {
                        Ok(results) if results.iter().all(|r| r.is_ok()) => {
                            remote_ok = true;
                            break;
                        }
                        Ok(_) | Err(_) => {}
                    }
                }
                if !remote_ok {
                    counters.remote_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(topic = %event.event_type, "remote transport failed its retry budget");
                }
            }
            if !remote_ok {
                if let Some(fb) = fallback {
                    let payload = match serde_json::to_value(&event) {
                        Ok(v) => v,
                        Err(_) => return,
                    };
                    if let Err(e) = fb.publish(&event.event_type, payload).await {
                        counters.fallback_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(topic = %event.event_type, error = %e, "fallback transport failed");
                    }
                }
            }
        });
    }

    /// Re-emit retained events on `topic` published at or after `since` to
    /// the topic's current subscribers. Handler idempotence makes this safe.
    pub async fn replay(&self, topic: &str, since: DateTime<Utc>) -> usize {
        let events: Vec<Event> = {
            let replay = self.inner.replay.lock().expect("replay lock");
            replay
                .iter()
                .filter(|e| e.event_type == topic && e.timestamp >= since)
                .cloned()
                .collect()
        };
        let targets = self.targets_for(topic);
        for event in &events {
            for (_, tx) in &targets {
                let _ = tx
                    .send_timeout(event.clone(), self.inner.cfg.backpressure_deadline)
                    .await;
            }
        }
        events.len()
    }

    pub fn stats(&self) -> BusStats {
        let c = &self.inner.counters;
        BusStats {
            published: c.published.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            dead_lettered: c.dead_lettered.load(Ordering::Relaxed),
            dead_letter_evicted: self.inner.dead_letters.evicted(),
            backpressure_rejects: c.backpressure_rejects.load(Ordering::Relaxed),
            remote_failures: c.remote_failures.load(Ordering::Relaxed),
            fallback_failures: c.fallback_failures.load(Ordering::Relaxed),
            subscriptions: self
                .inner
                .subs
                .read()
                .expect("subscription lock")
                .values()
                .map(|v| v.len())
                .sum(),
        }
    }

    pub fn dead_letters(&self, topic: &str) -> Vec<DeadLetter> {
        self.inner.dead_letters.for_topic(topic)
    }

    /// Cooperative shutdown: refuse new publishes, drain queues within the
    /// grace window, persist dead letters, log orphans.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let drained = {
                let subs = self.inner.subs.read().expect("subscription lock");
                subs.values()
                    .flatten()
                    .all(|e| e.tx.capacity() == e.tx.max_capacity())
            };
            if drained {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("shutdown grace window elapsed with undrained queues");
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        let entries: Vec<SubEntry> = {
            let mut subs = self.inner.subs.write().expect("subscription lock");
            subs.drain().flat_map(|(_, v)| v).collect()
        };
        for entry in entries {
            let SubEntry {
                name, tx, worker, ..
            } = entry;
            drop(tx);
            let remaining = deadline
                .saturating_duration_since(tokio::time::Instant::now())
                .max(Duration::from_millis(50));
            if tokio::time::timeout(remaining, worker).await.is_err() {
                warn!(subscriber = %name, "handler still running at grace end; orphaned");
            }
        }

        if let Some(path) = &self.inner.cfg.dead_letter_dump {
            match self.inner.dead_letters.dump_jsonl(path) {
                Ok(n) => info!(count = n, path = %path.display(), "dead letters persisted"),
                Err(e) => warn!(error = %e, "failed to persist dead letters"),
            }
        }
    }
}

struct WorkerCtx {
    topic: String,
    retry_delays: Vec<Duration>,
    counters: Arc<Counters>,
    dead_letters: DeadLetterStore,
}

/// One logical worker per `(topic, subscriber)`: dequeues and invokes the
/// handler sequentially, retrying per the ladder before dead-lettering.
async fn run_worker(subscriber: Arc<dyn Subscriber>, mut rx: mpsc::Receiver<Event>, ctx: WorkerCtx) {
    while let Some(event) = rx.recv().await {
        deliver_with_retries(subscriber.as_ref(), event, &ctx).await;
    }
}

async fn deliver_with_retries(subscriber: &dyn Subscriber, mut event: Event, ctx: &WorkerCtx) {
    let mut last_error = match subscriber.deliver(event.clone()).await {
        Ok(()) => {
            ctx.counters.delivered.fetch_add(1, Ordering::Relaxed);
            return;
        }
        Err(e) => e,
    };
    for delay in &ctx.retry_delays {
        tokio::time::sleep(*delay).await;
        event.attempt += 1;
        ctx.counters.retried.fetch_add(1, Ordering::Relaxed);
        match subscriber.deliver(event.clone()).await {
            Ok(()) => {
                ctx.counters.delivered.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) => last_error = e,
        }
    }
    ctx.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
    warn!(
        topic = %ctx.topic,
        subscriber = %subscriber.name(),
        event_id = %event.event_id,
        attempt = event.attempt,
        error = %last_error,
        "delivery exhausted retries; dead-lettering"
    );
    ctx.dead_letters
        .push(&ctx.topic, event, format!("{last_error:#}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use vigil_protocol::{CustomerMessage, LogLine, Payload};
    use vigil_topics as topics;

    struct Collector {
        name: String,
        events: Mutex<Vec<Event>>,
    }

    impl Collector {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                events: Mutex::new(Vec::new()),
            })
        }
        fn seen(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Subscriber for Collector {
        fn name(&self) -> &str {
            &self.name
        }
        async fn deliver(&self, event: Event) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct FailFirst {
        failures: u32,
        calls: AtomicU32,
        events: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl Subscriber for FailFirst {
        fn name(&self) -> &str {
            "fail-first"
        }
        async fn deliver(&self, event: Event) -> anyhow::Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                anyhow::bail!("induced failure {n}");
            }
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn msg_event(n: u32) -> Event {
        Event::new(
            format!("c-{n}"),
            "test",
            Payload::CustomerMessage(CustomerMessage {
                customer_id: "cust".into(),
                body: format!("message {n}"),
            }),
        )
    }

    fn fast_cfg() -> BusConfig {
        BusConfig {
            retry_delays: vec![
                Duration::from_millis(5),
                Duration::from_millis(5),
                Duration::from_millis(5),
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn publish_rejects_unknown_types() {
        let bus = Bus::new(fast_cfg());
        let mut event = msg_event(1);
        event.event_type = "customer.deleted".into();
        let err = bus.publish(event).await.unwrap_err();
        assert!(matches!(err, PublishError::UnknownType(_)));
        assert_eq!(bus.stats().published, 0);
    }

    #[tokio::test]
    async fn publish_rejects_payload_mismatch() {
        let bus = Bus::new(fast_cfg());
        let mut event = msg_event(1);
        event.event_type = topics::TOPIC_LOG_LINE.into();
        let err = bus.publish(event).await.unwrap_err();
        assert!(matches!(err, PublishError::PayloadMismatch { .. }));
    }

    #[tokio::test]
    async fn fanout_delivers_one_copy_per_subscriber() {
        let bus = Bus::new(fast_cfg());
        let a = Collector::new("a");
        let b = Collector::new("b");
        bus.subscribe(topics::TOPIC_CUSTOMER_MESSAGE, a.clone()).unwrap();
        bus.subscribe(topics::TOPIC_CUSTOMER_MESSAGE, b.clone()).unwrap();

        let id = bus.publish(msg_event(1)).await.unwrap();
        assert!(!id.is_empty());
        tokio::time::sleep(Duration::from_millis(50)).await;

        for collector in [&a, &b] {
            let seen = collector.seen();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].event_id, id);
            assert_eq!(seen[0].attempt, 0);
        }
        assert_eq!(bus.stats().delivered, 2);
    }

    #[tokio::test]
    async fn delivery_is_fifo_per_subscriber() {
        let bus = Bus::new(fast_cfg());
        let sub = Collector::new("ordered");
        bus.subscribe(topics::TOPIC_CUSTOMER_MESSAGE, sub.clone()).unwrap();
        for n in 0..20 {
            bus.publish(msg_event(n)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        let seen = sub.seen();
        assert_eq!(seen.len(), 20);
        for (n, event) in seen.iter().enumerate() {
            assert_eq!(event.correlation_id, format!("c-{n}"));
        }
    }

    #[tokio::test]
    async fn retries_then_dead_letters_with_attempt_three() {
        let bus = Bus::new(fast_cfg());
        let sub = Arc::new(FailFirst {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
            events: Mutex::new(Vec::new()),
        });
        bus.subscribe(topics::TOPIC_CUSTOMER_MESSAGE, sub).unwrap();
        bus.publish(msg_event(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        let letters = bus.dead_letters(topics::TOPIC_CUSTOMER_MESSAGE);
        assert_eq!(letters.len(), 1);
        assert!(letters[0].event.attempt >= 3);
        assert!(letters[0].reason.contains("induced failure"));
        let stats = bus.stats();
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.retried, 3);
        assert_eq!(stats.delivered, 0);
    }

    #[tokio::test]
    async fn transient_failure_recovers_without_dead_letter() {
        let bus = Bus::new(fast_cfg());
        let sub = Arc::new(FailFirst {
            failures: 2,
            calls: AtomicU32::new(0),
            events: Mutex::new(Vec::new()),
        });
        bus.subscribe(topics::TOPIC_CUSTOMER_MESSAGE, sub.clone()).unwrap();
        bus.publish(msg_event(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let seen = sub.events.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].attempt, 2);
        assert!(bus.dead_letters(topics::TOPIC_CUSTOMER_MESSAGE).is_empty());
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure_then_rejects() {
        struct Stuck;
        #[async_trait]
        impl Subscriber for Stuck {
            fn name(&self) -> &str {
                "stuck"
            }
            async fn deliver(&self, _event: Event) -> anyhow::Result<()> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
        let bus = Bus::new(BusConfig {
            queue_depth: 1,
            backpressure_deadline: Duration::from_millis(40),
            ..fast_cfg()
        });
        bus.subscribe(topics::TOPIC_CUSTOMER_MESSAGE, Arc::new(Stuck)).unwrap();

        bus.publish(msg_event(1)).await.unwrap(); // picked up, worker wedged
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish(msg_event(2)).await.unwrap(); // fills the queue
        let err = bus.publish(msg_event(3)).await.unwrap_err();
        assert!(matches!(err, PublishError::Backpressure { .. }));
        assert_eq!(bus.stats().backpressure_rejects, 1);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_stops_delivery() {
        let bus = Bus::new(fast_cfg());
        let sub = Collector::new("leaver");
        let handle = bus
            .subscribe(topics::TOPIC_CUSTOMER_MESSAGE, sub.clone())
            .unwrap();
        bus.unsubscribe(&handle);
        bus.unsubscribe(&handle);
        bus.publish(msg_event(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(sub.seen().is_empty());
        assert_eq!(bus.stats().subscriptions, 0);
    }

    #[tokio::test]
    async fn replay_reemits_to_current_subscribers() {
        let bus = Bus::new(fast_cfg());
        let since = Utc::now();
        bus.publish(msg_event(1)).await.unwrap();
        bus.publish(Event::new(
            "c-x",
            "test",
            Payload::LogLine(LogLine {
                source_component: "svc".into(),
                line: "noise".into(),
            }),
        ))
        .await
        .unwrap();

        // late subscriber missed the live publishes
        let late = Collector::new("late");
        bus.subscribe(topics::TOPIC_CUSTOMER_MESSAGE, late.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(late.seen().is_empty());

        let replayed = bus.replay(topics::TOPIC_CUSTOMER_MESSAGE, since).await;
        assert_eq!(replayed, 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let seen = late.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].correlation_id, "c-1");
    }

    struct FlakyRemote {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RemoteTransport for FlakyRemote {
        async fn put_events(
            &self,
            _events: &[Event],
        ) -> Result<Vec<Result<(), TransportError>>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Unavailable("down".into()))
        }
    }

    struct RecordingFallback {
        published: Mutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl FallbackTransport for RecordingFallback {
        async fn publish(
            &self,
            topic: &str,
            payload_json: serde_json::Value,
        ) -> Result<(), TransportError> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload_json));
            Ok(())
        }
    }

    #[tokio::test]
    async fn remote_failure_falls_back_and_never_fails_local_publish() {
        let remote = Arc::new(FlakyRemote {
            calls: AtomicU32::new(0),
        });
        let fallback = Arc::new(RecordingFallback {
            published: Mutex::new(Vec::new()),
        });
        let bus = Bus::with_transports(fast_cfg(), Some(remote.clone()), Some(fallback.clone()));
        let local = Collector::new("local");
        bus.subscribe(topics::TOPIC_CUSTOMER_MESSAGE, local.clone()).unwrap();

        bus.publish(msg_event(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1600)).await;

        assert_eq!(local.seen().len(), 1);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 3);
        let forwarded = fallback.published.lock().unwrap();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].0, topics::TOPIC_CUSTOMER_MESSAGE);
        assert_eq!(bus.stats().remote_failures, 1);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_publishes_and_drains() {
        let bus = Bus::new(fast_cfg());
        let sub = Collector::new("drainee");
        bus.subscribe(topics::TOPIC_CUSTOMER_MESSAGE, sub.clone()).unwrap();
        for n in 0..5 {
            bus.publish(msg_event(n)).await.unwrap();
        }
        bus.shutdown(Duration::from_secs(2)).await;
        assert_eq!(sub.seen().len(), 5);
        let err = bus.publish(msg_event(9)).await.unwrap_err();
        assert!(matches!(err, PublishError::ShuttingDown));
    }
}
