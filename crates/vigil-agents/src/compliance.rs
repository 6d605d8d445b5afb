use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use vigil_model::{ChatRequest, ModelClient};
use vigil_protocol::{ComplianceAction, ComplianceActionKind, Event, Payload};
use vigil_retrieval::{MetadataFilter, RetrievalIndex};
use vigil_topics as topics;

use crate::context::{citations_from, context_block};
use crate::{wrong_payload, Agent, AgentError};

#[derive(Debug, Clone)]
pub struct ComplianceConfig {
    pub block_threshold: f64,
    pub hold_threshold: f64,
    pub monitor_threshold: f64,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            block_threshold: 0.95,
            hold_threshold: 0.9,
            monitor_threshold: 0.8,
        }
    }
}

impl ComplianceConfig {
    pub fn from_core(cfg: &vigil_core::CoreConfig) -> Self {
        Self {
            block_threshold: cfg.compliance_block_threshold,
            hold_threshold: cfg.compliance_hold_threshold,
            monitor_threshold: cfg.risk_score_flag_threshold,
        }
    }
}

/// Deterministic rule table, used whenever the model cannot be constrained
/// to the four-action set. `block` excludes every other action.
pub fn decide_actions(score: f64, cfg: &ComplianceConfig) -> Vec<ComplianceActionKind> {
    if score >= cfg.block_threshold {
        vec![ComplianceActionKind::Block]
    } else if score >= cfg.hold_threshold {
        vec![ComplianceActionKind::Hold, ComplianceActionKind::Report]
    } else {
        vec![ComplianceActionKind::Monitor]
    }
}

/// Maps a flagged risk to AML/CTF actions, grounded in AUSTRAC guidance.
pub struct ComplianceAgent {
    model: Arc<dyn ModelClient>,
    index: Arc<RetrievalIndex>,
    cfg: ComplianceConfig,
}

impl ComplianceAgent {
    pub fn new(
        model: Arc<dyn ModelClient>,
        index: Arc<RetrievalIndex>,
        cfg: ComplianceConfig,
    ) -> Self {
        Self { model, index, cfg }
    }
}

#[async_trait]
impl Agent for ComplianceAgent {
    fn name(&self) -> &'static str {
        "compliance-agent"
    }

    fn topics(&self) -> &'static [&'static str] {
        &[topics::TOPIC_RISK_FLAGGED]
    }

    async fn handle(&self, event: &Event) -> Result<Vec<Event>, AgentError> {
        let Payload::RiskFlagged(risk) = &event.payload else {
            return Err(wrong_payload(self.name(), event));
        };

        let query = format!(
            "AML/CTF obligations for suspicious transaction indicators {}",
            risk.indicators.join(" ")
        );
        let retrieved = match self
            .index
            .search(&query, 3, &MetadataFilter::regulators(["AUSTRAC"]))
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "compliance retrieval failed");
                Default::default()
            }
        };

        let prompt = format!(
            "Regulatory context:\n{}\n\nTransaction {} was flagged with risk score {:.2} and \
             indicators [{}]. Choose the single most appropriate action. Reply with exactly one \
             word from: monitor, hold, block, report.",
            context_block(&retrieved),
            risk.transaction_id,
            risk.score,
            risk.indicators.join(", ")
        );
        let request = ChatRequest::new(prompt)
            .with_system("You are an AML/CTF compliance officer at an Australian bank.");

        let (actions, rationale_text) = match self.model.complete(request).await {
            Ok(completion) => match ComplianceActionKind::parse(&completion.text) {
                Some(action) => (vec![action], completion.text.trim().to_string()),
                None => {
                    // out-of-set reply: the rule table is authoritative
                    warn!(reply = %completion.text, "model reply outside action set; using rule table");
                    rule_outcome(risk.score, &self.cfg)
                }
            },
            Err(e) => {
                warn!(error = %e, "model unavailable for compliance decision; using rule table");
                rule_outcome(risk.score, &self.cfg)
            }
        };

        let citations = citations_from(&retrieved);
        Ok(actions
            .into_iter()
            .map(|action| {
                Event::new(
                    event.correlation_id.clone(),
                    self.name(),
                    Payload::ComplianceAction(ComplianceAction {
                        transaction_id: risk.transaction_id.clone(),
                        action,
                        rationale_text: rationale_text.clone(),
                        citations: citations.clone(),
                    }),
                )
            })
            .collect())
    }
}

fn rule_outcome(score: f64, cfg: &ComplianceConfig) -> (Vec<ComplianceActionKind>, String) {
    let actions = decide_actions(score, cfg);
    let rationale = format!(
        "rule table: score {:.2} maps to [{}]",
        score,
        actions
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    (actions, rationale)
}
