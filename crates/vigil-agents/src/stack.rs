//! Wires the seven agents onto a bus with shared metrics, the way the
//! process entrypoint (and the scenario tests) bring the pipeline up.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use vigil_core::CoreConfig;
use vigil_events::{Bus, BusConfig, SubscriptionHandle};
use vigil_model::{ModelAdapterConfig, ModelClient};
use vigil_protocol::PublishError;
use vigil_retrieval::{CorpusLoader, IngestReport, RetrievalIndex, RetrievalIndexConfig};

use crate::{
    AgentHarness, AgentMetrics, AssistantAgent, ComplianceAgent, ComplianceConfig, HarnessConfig,
    KnowledgeAgent, KnowledgeConfig, PrivacyAgent, ResilienceAgent, RiskAgent, RiskConfig,
    SentimentAgent,
};

/// Everything mount_agents created; keep it alive for the process
/// lifetime and abort the flusher on shutdown.
pub struct AgentStack {
    pub metrics: AgentMetrics,
    pub handles: Vec<SubscriptionHandle>,
    pub knowledge_flusher: JoinHandle<()>,
}

impl AgentStack {
    pub fn shutdown(self) {
        self.knowledge_flusher.abort();
    }
}

/// Bus settings derived from the single config record. Retry delays and
/// dead-letter depth keep their built-in defaults.
pub fn bus_config(cfg: &CoreConfig) -> BusConfig {
    BusConfig {
        queue_depth: cfg.subscriber_queue_depth,
        backpressure_deadline: Duration::from_millis(cfg.publish_backpressure_deadline_ms),
        dead_letter_dump: cfg.dead_letter_dump_path.clone().map(PathBuf::from),
        ..Default::default()
    }
}

/// Model adapter settings derived from the single config record.
pub fn model_config(cfg: &CoreConfig) -> ModelAdapterConfig {
    ModelAdapterConfig {
        embedding_dimension: cfg.embedding_dimension,
        complete_timeout: Duration::from_millis(cfg.model_complete_timeout_ms),
        embed_timeout: Duration::from_millis(cfg.model_embed_timeout_ms),
        retry_attempts: cfg.model_retry_attempts,
        ..Default::default()
    }
}

/// Retrieval index settings derived from the single config record.
pub fn index_config(cfg: &CoreConfig) -> RetrievalIndexConfig {
    RetrievalIndexConfig {
        chunk_size_chars: cfg.chunk_size_chars,
        chunk_overlap_chars: cfg.chunk_overlap_chars,
        exact_ceiling_chunks: cfg.retrieval_exact_ceiling_chunks,
    }
}

/// Load the JSON corpus directory named by the config, if any, and ingest
/// it document by document.
pub async fn ingest_corpus_from_config(
    index: &RetrievalIndex,
    cfg: &CoreConfig,
) -> anyhow::Result<Vec<IngestReport>> {
    let Some(dir) = &cfg.corpus_dir else {
        return Ok(Vec::new());
    };
    let docs = CorpusLoader::new(dir).load()?;
    Ok(index.ingest_corpus(&docs).await?)
}

/// Construct all seven handlers from the config record and subscribe them
/// through fresh harnesses sharing one metrics registry.
pub fn mount_agents(
    bus: &Bus,
    model: Arc<dyn ModelClient>,
    index: Arc<RetrievalIndex>,
    cfg: &CoreConfig,
) -> Result<AgentStack, PublishError> {
    let metrics = AgentMetrics::new();
    let harness_cfg = HarnessConfig {
        handler_timeout: Duration::from_millis(cfg.handler_timeout_ms),
        dedup_window: 10_000,
    };
    let mut handles = Vec::new();

    let risk = Arc::new(RiskAgent::new(
        model.clone(),
        index.clone(),
        RiskConfig::from_core(cfg),
    ));
    handles.extend(AgentHarness::mount(
        bus,
        risk,
        harness_cfg.clone(),
        metrics.clone(),
    )?);

    let compliance = Arc::new(ComplianceAgent::new(
        model.clone(),
        index.clone(),
        ComplianceConfig::from_core(cfg),
    ));
    handles.extend(AgentHarness::mount(
        bus,
        compliance,
        harness_cfg.clone(),
        metrics.clone(),
    )?);

    handles.extend(AgentHarness::mount(
        bus,
        Arc::new(ResilienceAgent),
        harness_cfg.clone(),
        metrics.clone(),
    )?);

    let sentiment = Arc::new(SentimentAgent::new(
        model.clone(),
        cfg.sentiment_alert_threshold,
    ));
    handles.extend(AgentHarness::mount(
        bus,
        sentiment,
        harness_cfg.clone(),
        metrics.clone(),
    )?);

    handles.extend(AgentHarness::mount(
        bus,
        Arc::new(PrivacyAgent),
        harness_cfg.clone(),
        metrics.clone(),
    )?);

    let knowledge = Arc::new(KnowledgeAgent::new(
        model.clone(),
        KnowledgeConfig::from_core(cfg),
    ));
    let knowledge_flusher = knowledge.spawn_flusher(bus.clone());
    handles.extend(AgentHarness::mount(
        bus,
        knowledge,
        harness_cfg.clone(),
        metrics.clone(),
    )?);

    let assistant = Arc::new(AssistantAgent::new(model, index, cfg.retrieval_top_k));
    handles.extend(AgentHarness::mount(bus, assistant, harness_cfg, metrics.clone())?);

    Ok(AgentStack {
        metrics,
        handles,
        knowledge_flusher,
    })
}
