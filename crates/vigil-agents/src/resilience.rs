use async_trait::async_trait;
use vigil_protocol::{ComplianceActionKind, Event, OpsAction, Payload};
use vigil_topics as topics;

use crate::{wrong_payload, Agent, AgentError};

/// Translates a compliance decision into one operational intent. The core
/// publishes the intent; it never calls a banking system itself.
pub struct ResilienceAgent;

fn intent_for(action: ComplianceActionKind, transaction_id: &str) -> (String, serde_json::Value) {
    match action {
        ComplianceActionKind::Block => (
            "block_transaction".to_string(),
            serde_json::json!({ "transaction_id": transaction_id, "freeze_account": true }),
        ),
        ComplianceActionKind::Hold => (
            "place_hold".to_string(),
            serde_json::json!({ "transaction_id": transaction_id }),
        ),
        ComplianceActionKind::Report => (
            "enqueue_regulator_report".to_string(),
            serde_json::json!({ "transaction_id": transaction_id, "regulator": "AUSTRAC" }),
        ),
        ComplianceActionKind::Monitor => (
            "monitor_transaction".to_string(),
            serde_json::json!({ "transaction_id": transaction_id, "window_hours": 24 }),
        ),
    }
}

#[async_trait]
impl Agent for ResilienceAgent {
    fn name(&self) -> &'static str {
        "resilience-agent"
    }

    fn topics(&self) -> &'static [&'static str] {
        &[topics::TOPIC_COMPLIANCE_ACTION]
    }

    async fn handle(&self, event: &Event) -> Result<Vec<Event>, AgentError> {
        let Payload::ComplianceAction(decision) = &event.payload else {
            return Err(wrong_payload(self.name(), event));
        };
        let (intent, parameters) = intent_for(decision.action, &decision.transaction_id);
        // exactly one ops.action per input event
        Ok(vec![Event::new(
            event.correlation_id.clone(),
            self.name(),
            Payload::OpsAction(OpsAction {
                transaction_id: decision.transaction_id.clone(),
                intent,
                parameters,
            }),
        )])
    }
}
