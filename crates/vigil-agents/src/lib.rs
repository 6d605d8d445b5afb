//! The seven analysis agents and the shared harness that mounts them on
//! the bus. Every handler is a pure `event in -> events out` function;
//! dedup, timing, deadlines, and publishing live in the harness.

use async_trait::async_trait;
use vigil_protocol::Event;

mod assistant;
mod compliance;
mod context;
mod harness;
mod knowledge;
mod metrics;
mod privacy;
mod resilience;
mod risk;
mod sentiment;
mod stack;

pub use assistant::AssistantAgent;
pub use compliance::{decide_actions, ComplianceAgent, ComplianceConfig};
pub use harness::{AgentHarness, HarnessConfig};
pub use knowledge::{KnowledgeAgent, KnowledgeConfig};
pub use metrics::{AgentMetrics, AgentStat};
pub use privacy::{scan_line, PrivacyAgent};
pub use resilience::ResilienceAgent;
pub use risk::{score_transaction, RiskAgent, RiskConfig};
pub use sentiment::{lexicon_score, SentimentAgent};
pub use stack::{
    bus_config, index_config, ingest_corpus_from_config, model_config, mount_agents, AgentStack,
};

/// Why a handler could not produce its events. The harness captures these
/// and routes the delivery into the bus retry/dead-letter path.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("model call failed: {0}")]
    Model(#[from] vigil_model::ModelError),
    #[error("retrieval failed: {0}")]
    Search(#[from] vigil_retrieval::SearchError),
    #[error("{agent} received an unexpected payload: {detail}")]
    Payload { agent: &'static str, detail: String },
}

/// One analysis agent. `handle` must be idempotent per event id; the
/// harness skips ids it has already processed, but replay and redelivery
/// can still reach the handler.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;
    fn topics(&self) -> &'static [&'static str];
    async fn handle(&self, event: &Event) -> Result<Vec<Event>, AgentError>;
}

/// Shorthand used by handlers that expect exactly one payload shape.
pub(crate) fn wrong_payload(agent: &'static str, event: &Event) -> AgentError {
    AgentError::Payload {
        agent,
        detail: format!("event type {}", event.event_type),
    }
}
