use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use vigil_events::Bus;
use vigil_model::{ChatRequest, ModelClient};
use vigil_protocol::{AlertChannel, Citation, Event, OpsAlert, Payload};
use vigil_topics as topics;

use crate::{Agent, AgentError};

const KNOWLEDGE_TOPICS: [&str; 5] = [
    topics::TOPIC_RISK_FLAGGED,
    topics::TOPIC_COMPLIANCE_ACTION,
    topics::TOPIC_OPS_ACTION,
    topics::TOPIC_OPS_ALERT,
    topics::TOPIC_PRIVACY_VIOLATION,
];

#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    /// Idle time after which an un-narrated correlation is summarized.
    pub quiet_period: Duration,
    /// Accumulated state older than this is dropped unsummarized.
    pub ttl: Duration,
    pub max_correlations: usize,
    pub flush_interval: Duration,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_secs(5),
            ttl: Duration::from_secs(600),
            max_correlations: 10_000,
            flush_interval: Duration::from_millis(250),
        }
    }
}

impl KnowledgeConfig {
    pub fn from_core(cfg: &vigil_core::CoreConfig) -> Self {
        Self {
            quiet_period: Duration::from_millis(cfg.knowledge_quiet_period_ms),
            ttl: Duration::from_millis(cfg.context_ttl_ms),
            ..Default::default()
        }
    }
}

struct Accumulated {
    fragments: Vec<String>,
    citations: Vec<Citation>,
    last_event: Instant,
    created: Instant,
}

/// Accumulates the pipeline's events per correlation id and narrates them
/// in plain language. Narration fires synchronously on `ops.action` and,
/// for correlations that never reach one, from a quiet-period flusher that
/// publishes through its own bus handle. The supervisor owns the
/// authoritative context lifetime; this state is best-effort and the
/// handler tolerates entries disappearing underneath it.
pub struct KnowledgeAgent {
    model: Arc<dyn ModelClient>,
    state: Arc<Mutex<HashMap<String, Accumulated>>>,
    cfg: KnowledgeConfig,
}

impl KnowledgeAgent {
    pub fn new(model: Arc<dyn ModelClient>, cfg: KnowledgeConfig) -> Self {
        Self {
            model,
            state: Arc::new(Mutex::new(HashMap::new())),
            cfg,
        }
    }

    /// Background task: summarize correlations quiet for `quiet_period`
    /// and drop anything past its TTL. Abort the handle on shutdown.
    pub fn spawn_flusher(&self, bus: Bus) -> JoinHandle<()> {
        let model = self.model.clone();
        let state = self.state.clone();
        let cfg = self.cfg.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(cfg.flush_interval).await;
                let now = Instant::now();
                let due: Vec<(String, Accumulated)> = {
                    let mut map = state.lock().expect("knowledge state lock");
                    let keys: Vec<String> = map
                        .iter()
                        .filter(|(_, acc)| {
                            now.saturating_duration_since(acc.last_event) >= cfg.quiet_period
                                || now.saturating_duration_since(acc.created) >= cfg.ttl
                        })
                        .map(|(k, _)| k.clone())
                        .collect();
                    keys.into_iter()
                        .filter_map(|k| map.remove(&k).map(|acc| (k, acc)))
                        .collect()
                };
                for (correlation_id, acc) in due {
                    if now.saturating_duration_since(acc.created) >= cfg.ttl {
                        debug!(%correlation_id, "accumulated state expired unsummarized");
                        continue;
                    }
                    if let Some((summary_text, citations)) =
                        summarize(model.as_ref(), &correlation_id, &acc).await
                    {
                        let event = Event::new(
                            correlation_id,
                            "knowledge-agent",
                            Payload::OpsAlert(OpsAlert::Narrative {
                                summary_text,
                                citations,
                            }),
                        );
                        if let Err(e) = bus.publish(event).await {
                            warn!(error = %e, "quiet-period narrative publish failed");
                        }
                    }
                }
            }
        })
    }

    fn record(&self, event: &Event) {
        let fragment = describe(event);
        let new_citations = event_citations(event);
        let mut map = self.state.lock().expect("knowledge state lock");
        if map.len() >= self.cfg.max_correlations && !map.contains_key(&event.correlation_id) {
            let oldest = map
                .iter()
                .min_by_key(|(_, acc)| acc.last_event)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                map.remove(&key);
            }
        }
        let now = Instant::now();
        let acc = map
            .entry(event.correlation_id.clone())
            .or_insert_with(|| Accumulated {
                fragments: Vec::new(),
                citations: Vec::new(),
                last_event: now,
                created: now,
            });
        acc.fragments.push(fragment);
        for citation in new_citations {
            if !acc
                .citations
                .iter()
                .any(|c| c.document_id == citation.document_id)
            {
                acc.citations.push(citation);
            }
        }
        acc.last_event = now;
    }
}

#[async_trait]
impl Agent for KnowledgeAgent {
    fn name(&self) -> &'static str {
        "knowledge-agent"
    }

    fn topics(&self) -> &'static [&'static str] {
        &KNOWLEDGE_TOPICS
    }

    async fn handle(&self, event: &Event) -> Result<Vec<Event>, AgentError> {
        // never react to our own narrations
        if let Payload::OpsAlert(alert) = &event.payload {
            if alert.channel() == AlertChannel::Narrative {
                return Ok(vec![]);
            }
        }

        self.record(event);

        if event.event_type != topics::TOPIC_OPS_ACTION {
            return Ok(vec![]);
        }

        // the action landed: narrate now with whatever state survived
        let taken = self
            .state
            .lock()
            .expect("knowledge state lock")
            .remove(&event.correlation_id);
        let acc = match taken {
            Some(acc) => acc,
            None => {
                // state evicted underneath us; narrate the action alone
                let now = Instant::now();
                Accumulated {
                    fragments: vec![describe(event)],
                    citations: Vec::new(),
                    last_event: now,
                    created: now,
                }
            }
        };
        match summarize(self.model.as_ref(), &event.correlation_id, &acc).await {
            Some((summary_text, citations)) => Ok(vec![Event::new(
                event.correlation_id.clone(),
                self.name(),
                Payload::OpsAlert(OpsAlert::Narrative {
                    summary_text,
                    citations,
                }),
            )]),
            // documented degradation: the narrative may be omitted
            None => Ok(vec![]),
        }
    }
}

async fn summarize(
    model: &dyn ModelClient,
    correlation_id: &str,
    acc: &Accumulated,
) -> Option<(String, Vec<Citation>)> {
    let sources: Vec<&str> = acc.citations.iter().map(|c| c.regulator.as_str()).collect();
    let prompt = format!(
        "Events observed for case {}:\n- {}\n\nRegulatory sources involved: {}.\n\nWrite a \
         short plain-language summary for the operations team.",
        correlation_id,
        acc.fragments.join("\n- "),
        if sources.is_empty() {
            "none".to_string()
        } else {
            sources.join(", ")
        }
    );
    let request = ChatRequest::new(prompt)
        .with_system("You turn raw banking-security events into clear operator narratives.");
    match model.complete(request).await {
        Ok(completion) => Some((completion.text, acc.citations.clone())),
        Err(e) => {
            warn!(%correlation_id, error = %e, "narrative suppressed; model call failed");
            None
        }
    }
}

fn describe(event: &Event) -> String {
    match &event.payload {
        Payload::RiskFlagged(r) => format!(
            "risk flagged on {}: score {:.2}, indicators [{}]",
            r.transaction_id,
            r.score,
            r.indicators.join(", ")
        ),
        Payload::ComplianceAction(c) => format!(
            "compliance chose {} for {}",
            c.action.as_str(),
            c.transaction_id
        ),
        Payload::OpsAction(o) => format!("operational intent {} for {}", o.intent, o.transaction_id),
        Payload::OpsAlert(OpsAlert::Sentiment {
            sentiment_score, ..
        }) => format!("customer sentiment alert, score {sentiment_score:.2}"),
        Payload::PrivacyViolation(p) => format!(
            "privacy violation in {}: {} finding(s)",
            p.source_component,
            p.findings.len()
        ),
        _ => event.event_type.clone(),
    }
}

fn event_citations(event: &Event) -> Vec<Citation> {
    match &event.payload {
        Payload::RiskFlagged(r) => r.citations.clone(),
        Payload::ComplianceAction(c) => c.citations.clone(),
        _ => Vec::new(),
    }
}
