//! Wire types shared across the workspace: the event envelope, the typed
//! payload union, and the publish error taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod payload;

pub use payload::{
    AlertChannel, Citation, ComplianceAction, ComplianceActionKind, CustomerMessage, LogLine,
    OpsAction, OpsAlert, Payload, PiiFinding, PiiKind, PrivacyViolation, RiskFlagged,
    TransactionCreated, UserQuery, UserResponse,
};

/// RFC3339 with millisecond precision and explicit offset.
pub mod ts_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// The unit of communication on the bus. Immutable after publish; every
/// subscriber receives its own copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// One of the closed vocabulary in `vigil-topics`.
    pub event_type: String,
    /// Stable identifier threading all events for one originating input.
    pub correlation_id: String,
    /// Globally unique; assigned at publish when empty. Handlers treat a
    /// repeated id as a no-op.
    #[serde(default)]
    pub event_id: String,
    #[serde(with = "ts_millis")]
    pub timestamp: DateTime<Utc>,
    /// Name of the publishing agent or external producer.
    pub source: String,
    /// 0 on first publish; incremented on each redelivery.
    #[serde(default)]
    pub attempt: u32,
    pub payload: Payload,
}

impl Event {
    /// Build an event whose `event_type` is derived from the payload
    /// variant. The id and timestamp are stamped by the bus at publish.
    pub fn new(
        correlation_id: impl Into<String>,
        source: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            event_type: payload.topic().to_string(),
            correlation_id: correlation_id.into(),
            event_id: String::new(),
            timestamp: Utc::now(),
            source: source.into(),
            attempt: 0,
            payload,
        }
    }

    /// Same as [`Event::new`] but with a caller-chosen event id, used by
    /// producers that need idempotent republish.
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    /// True when the envelope's declared type matches the payload variant.
    pub fn is_coherent(&self) -> bool {
        self.event_type == self.payload.topic()
    }
}

/// Mint a fresh event id. Centralized so tests can reason about the format.
pub fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

/// Why a publish was refused. Remote-transport trouble never surfaces here;
/// it is logged and retried out of band.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("unknown event type: {0}")]
    UnknownType(String),
    #[error("payload is {actual} but envelope says {declared}")]
    PayloadMismatch { declared: String, actual: String },
    #[error("subscriber {subscriber} queue full past deadline on {topic}")]
    Backpressure { topic: String, subscriber: String },
    #[error("bus is shutting down")]
    ShuttingDown,
}
