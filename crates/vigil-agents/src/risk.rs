use std::sync::Arc;

use async_trait::async_trait;
use chrono::Timelike;
use tracing::{debug, warn};
use vigil_model::{ChatRequest, ModelClient};
use vigil_protocol::{Event, Payload, RiskFlagged, TransactionCreated};
use vigil_retrieval::{MetadataFilter, RetrievalIndex};
use vigil_topics as topics;

use crate::context::{citations_from, context_block};
use crate::{wrong_payload, Agent, AgentError};

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Scores at or above this publish `risk.flagged`.
    pub flag_threshold: f64,
    /// Amount at which the amount component saturates.
    pub amount_threshold: f64,
    pub home_jurisdiction: String,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            flag_threshold: 0.8,
            amount_threshold: 10_000.0,
            home_jurisdiction: "AU".to_string(),
        }
    }
}

impl RiskConfig {
    pub fn from_core(cfg: &vigil_core::CoreConfig) -> Self {
        Self {
            flag_threshold: cfg.risk_score_flag_threshold,
            amount_threshold: cfg.risk_amount_threshold,
            home_jurisdiction: cfg.home_jurisdiction.clone(),
        }
    }
}

/// Numeric feature scoring, independent of the model so the decision
/// survives a full provider outage. Amount saturates at 0.4, off-hours
/// adds 0.2, a cross-jurisdiction destination adds 0.3, and the upstream
/// velocity indicator contributes up to 0.3. Clamped to [0, 1].
pub fn score_transaction(tx: &TransactionCreated, cfg: &RiskConfig) -> (f64, Vec<String>) {
    let mut score = 0.0;
    let mut indicators = Vec::new();

    let amount: f64 = tx.amount.parse().unwrap_or(0.0);
    score += (amount / cfg.amount_threshold).min(1.0) * 0.4;
    if amount >= cfg.amount_threshold {
        indicators.push("high_amount".to_string());
    }

    // 00:00-05:00 in the transaction's own offset
    if tx.initiated_at.hour() < 5 {
        score += 0.2;
        indicators.push("off_hours".to_string());
    }

    if tx.destination_jurisdiction != cfg.home_jurisdiction {
        score += 0.3;
        indicators.push("cross_jurisdiction".to_string());
    }

    if tx.velocity > 0.0 {
        score += tx.velocity.clamp(0.0, 1.0) * 0.3;
        indicators.push("velocity".to_string());
    }

    (score.clamp(0.0, 1.0), indicators)
}

/// Watches `transaction.created`, scores it, and flags it with a
/// model-written justification grounded in AUSTRAC/APRA guidance. The
/// numeric decision is never suppressed by model trouble.
pub struct RiskAgent {
    model: Arc<dyn ModelClient>,
    index: Arc<RetrievalIndex>,
    cfg: RiskConfig,
}

impl RiskAgent {
    pub fn new(model: Arc<dyn ModelClient>, index: Arc<RetrievalIndex>, cfg: RiskConfig) -> Self {
        Self { model, index, cfg }
    }
}

#[async_trait]
impl Agent for RiskAgent {
    fn name(&self) -> &'static str {
        "risk-agent"
    }

    fn topics(&self) -> &'static [&'static str] {
        &[topics::TOPIC_TRANSACTION_CREATED]
    }

    async fn handle(&self, event: &Event) -> Result<Vec<Event>, AgentError> {
        let Payload::TransactionCreated(tx) = &event.payload else {
            return Err(wrong_payload(self.name(), event));
        };

        let (score, indicators) = score_transaction(tx, &self.cfg);
        if score < self.cfg.flag_threshold {
            debug!(transaction_id = %tx.transaction_id, score, "below flag threshold");
            return Ok(vec![]);
        }

        let query = format!(
            "suspicious transaction monitoring AML/CTF amount {} {} destination {}",
            tx.amount, tx.currency, tx.destination_jurisdiction
        );
        let filter = MetadataFilter::regulators(["AUSTRAC", "APRA"]);
        let retrieved = match self.index.search(&query, 3, &filter).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "risk retrieval failed; flagging without citations");
                Default::default()
            }
        };

        let prompt = format!(
            "Regulatory context:\n{}\n\nTransaction {} for {} {} to jurisdiction {} scored {:.2} \
             on indicators [{}]. In two sentences, justify why this transaction is high risk.",
            context_block(&retrieved),
            tx.transaction_id,
            tx.amount,
            tx.currency,
            tx.destination_jurisdiction,
            score,
            indicators.join(", ")
        );
        let request = ChatRequest::new(prompt)
            .with_system("You are a transaction risk analyst for an Australian bank.");

        let (justification_text, citations) = match self.model.complete(request).await {
            Ok(completion) => (completion.text, citations_from(&retrieved)),
            Err(e) => {
                // degrade, don't drop: the numeric decision stands alone
                warn!(error = %e, transaction_id = %tx.transaction_id, "model unavailable for justification");
                ("(model unavailable; numeric features only)".to_string(), vec![])
            }
        };

        Ok(vec![Event::new(
            event.correlation_id.clone(),
            self.name(),
            Payload::RiskFlagged(RiskFlagged {
                transaction_id: tx.transaction_id.clone(),
                score,
                indicators,
                justification_text,
                citations,
            }),
        )])
    }
}
