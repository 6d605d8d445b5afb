use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use vigil_topics as topics;

/// One structured body per event type, tagged so schema drift is a
/// validation-time failure instead of a silent map lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    TransactionCreated(TransactionCreated),
    RiskFlagged(RiskFlagged),
    ComplianceAction(ComplianceAction),
    OpsAction(OpsAction),
    OpsAlert(OpsAlert),
    CustomerMessage(CustomerMessage),
    LogLine(LogLine),
    UserQuery(UserQuery),
    UserResponse(UserResponse),
    PrivacyViolation(PrivacyViolation),
}

impl Payload {
    /// The topic this payload travels on.
    pub fn topic(&self) -> &'static str {
        match self {
            Payload::TransactionCreated(_) => topics::TOPIC_TRANSACTION_CREATED,
            Payload::RiskFlagged(_) => topics::TOPIC_RISK_FLAGGED,
            Payload::ComplianceAction(_) => topics::TOPIC_COMPLIANCE_ACTION,
            Payload::OpsAction(_) => topics::TOPIC_OPS_ACTION,
            Payload::OpsAlert(_) => topics::TOPIC_OPS_ALERT,
            Payload::CustomerMessage(_) => topics::TOPIC_CUSTOMER_MESSAGE,
            Payload::LogLine(_) => topics::TOPIC_LOG_LINE,
            Payload::UserQuery(_) => topics::TOPIC_USER_QUERY,
            Payload::UserResponse(_) => topics::TOPIC_USER_RESPONSE,
            Payload::PrivacyViolation(_) => topics::TOPIC_PRIVACY_VIOLATION,
        }
    }
}

/// Emitted by the upstream ledger. Monetary amounts are decimal strings
/// plus an ISO-4217 code; the core never holds money as a float.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionCreated {
    pub transaction_id: String,
    pub amount: String,
    pub currency: String,
    pub origin_account: String,
    pub destination_account: String,
    /// ISO 3166-1 alpha-2 of the receiving institution.
    pub destination_jurisdiction: String,
    /// Wall-clock at initiation, with the originating offset preserved so
    /// hour-of-day checks run in the customer's local time.
    pub initiated_at: DateTime<FixedOffset>,
    /// Velocity indicator computed upstream, 0.0 (quiet) to 1.0 (burst).
    #[serde(default)]
    pub velocity: f64,
}

/// A retrieval citation attached to model-backed decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub regulator: String,
    pub doc_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFlagged {
    pub transaction_id: String,
    /// In [0.0, 1.0]; only scores at or above the flag threshold are
    /// published.
    pub score: f64,
    pub indicators: Vec<String>,
    pub justification_text: String,
    pub citations: Vec<Citation>,
}

/// The four actions compliance may take. `Block` supersedes the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceActionKind {
    Monitor,
    Hold,
    Block,
    Report,
}

impl ComplianceActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceActionKind::Monitor => "monitor",
            ComplianceActionKind::Hold => "hold",
            ComplianceActionKind::Block => "block",
            ComplianceActionKind::Report => "report",
        }
    }

    /// Strict parse of a model reply; anything but exactly one in-set token
    /// is `None` and the caller falls back to the rule table.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "monitor" => Some(ComplianceActionKind::Monitor),
            "hold" => Some(ComplianceActionKind::Hold),
            "block" => Some(ComplianceActionKind::Block),
            "report" => Some(ComplianceActionKind::Report),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceAction {
    pub transaction_id: String,
    pub action: ComplianceActionKind,
    pub rationale_text: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsAction {
    pub transaction_id: String,
    /// Operational step for downstream systems; the core publishes the
    /// intent but never executes it.
    pub intent: String,
    pub parameters: serde_json::Value,
}

/// Which surface an `ops.alert` addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum OpsAlert {
    Sentiment {
        sentiment_score: f64,
        excerpt: String,
        suggested_action: String,
    },
    Narrative {
        summary_text: String,
        citations: Vec<Citation>,
    },
}

/// Convenience mirror of the serde tag, for stage tracking and filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertChannel {
    Sentiment,
    Narrative,
}

impl OpsAlert {
    pub fn channel(&self) -> AlertChannel {
        match self {
            OpsAlert::Sentiment { .. } => AlertChannel::Sentiment,
            OpsAlert::Narrative { .. } => AlertChannel::Narrative,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerMessage {
    pub customer_id: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub source_component: String,
    pub line: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuery {
    pub query_id: String,
    pub question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub query_id: String,
    pub answer_text: String,
    pub citations: Vec<Citation>,
}

/// Kinds of personally identifiable information the privacy scan detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Email,
    TaxFileNumber,
    CardNumber,
    Phone,
}

impl PiiKind {
    /// Typed placeholder substituted into sanitized output.
    pub fn placeholder(&self) -> &'static str {
        match self {
            PiiKind::Email => "<EMAIL>",
            PiiKind::TaxFileNumber => "<TFN>",
            PiiKind::CardNumber => "<CARD>",
            PiiKind::Phone => "<PHONE>",
        }
    }
}

/// One detected occurrence. Carries the character offset, never the match
/// itself, so findings are safe to log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiFinding {
    #[serde(rename = "kind")]
    pub pii_kind: PiiKind,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyViolation {
    pub source_component: String,
    pub findings: Vec<PiiFinding>,
    pub sanitized_line: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_tag_round_trips() {
        let p = Payload::OpsAlert(OpsAlert::Narrative {
            summary_text: "all clear".into(),
            citations: vec![],
        });
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["kind"], "ops_alert");
        assert_eq!(json["channel"], "narrative");
        let back: Payload = serde_json::from_value(json).unwrap();
        assert_eq!(back.topic(), topics::TOPIC_OPS_ALERT);
    }

    #[test]
    fn compliance_action_parse_is_strict() {
        assert_eq!(
            ComplianceActionKind::parse(" BLOCK \n"),
            Some(ComplianceActionKind::Block)
        );
        assert_eq!(ComplianceActionKind::parse("block the tx"), None);
        assert_eq!(ComplianceActionKind::parse(""), None);
    }

    #[test]
    fn amounts_stay_textual() {
        let tx: TransactionCreated = serde_json::from_value(serde_json::json!({
            "transaction_id": "tx-1",
            "amount": "50000.00",
            "currency": "AUD",
            "origin_account": "acc-1",
            "destination_account": "acc-2",
            "destination_jurisdiction": "KP",
            "initiated_at": "2025-01-15T02:14:00+11:00"
        }))
        .unwrap();
        assert_eq!(tx.amount, "50000.00");
        assert_eq!(tx.velocity, 0.0);
        use chrono::Timelike;
        assert_eq!(tx.initiated_at.hour(), 2);
    }
}
