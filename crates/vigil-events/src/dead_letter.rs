use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use vigil_protocol::Event;

/// A delivery that exhausted its retries, kept for inspection. Never
/// redelivered automatically.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub event: Event,
    pub reason: String,
    #[serde(with = "vigil_protocol::ts_millis")]
    pub at: DateTime<Utc>,
}

/// Per-topic bounded dead-letter queues. When a topic hits the cap the
/// oldest entry is evicted and counted.
#[derive(Clone)]
pub struct DeadLetterStore {
    inner: Arc<Mutex<HashMap<String, VecDeque<DeadLetter>>>>,
    cap: usize,
    evicted: Arc<AtomicU64>,
}

impl DeadLetterStore {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            cap: cap.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn push(&self, topic: &str, event: Event, reason: String) {
        let mut map = self.inner.lock().expect("dead letter lock");
        let queue = map.entry(topic.to_string()).or_default();
        if queue.len() == self.cap {
            queue.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(DeadLetter {
            event,
            reason,
            at: Utc::now(),
        });
    }

    pub fn for_topic(&self, topic: &str) -> Vec<DeadLetter> {
        self.inner
            .lock()
            .expect("dead letter lock")
            .get(topic)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.inner
            .lock()
            .expect("dead letter lock")
            .values()
            .map(|q| q.len())
            .sum()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Append everything as JSONL for post-mortems, one object per line.
    pub fn dump_jsonl(&self, path: &Path) -> std::io::Result<usize> {
        use std::io::Write as _;
        let entries: Vec<DeadLetter> = {
            let map = self.inner.lock().expect("dead letter lock");
            map.values().flatten().cloned().collect()
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let mut written = 0usize;
        for entry in &entries {
            if let Ok(line) = serde_json::to_string(entry) {
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
                written += 1;
            }
        }
        Ok(written)
    }
}
