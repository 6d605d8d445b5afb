//! Canonical event topic constants shared across the workspace.
//!
//! The topic set is closed: the bus rejects publishes whose type is not
//! listed here. Keep this list alphabetized within sections and favor
//! dot.case names.

// Externally produced inputs
pub const TOPIC_CUSTOMER_MESSAGE: &str = "customer.message";
pub const TOPIC_LOG_LINE: &str = "log.line";
pub const TOPIC_TRANSACTION_CREATED: &str = "transaction.created";
pub const TOPIC_USER_QUERY: &str = "user.query";

// Internal pipeline events
pub const TOPIC_COMPLIANCE_ACTION: &str = "compliance.action";
pub const TOPIC_OPS_ACTION: &str = "ops.action";
pub const TOPIC_OPS_ALERT: &str = "ops.alert";
pub const TOPIC_RISK_FLAGGED: &str = "risk.flagged";

// Outputs
pub const TOPIC_PRIVACY_VIOLATION: &str = "privacy.violation";
pub const TOPIC_USER_RESPONSE: &str = "user.response";

/// Every topic the bus will accept, in stable order.
pub const ALL_TOPICS: [&str; 10] = [
    TOPIC_TRANSACTION_CREATED,
    TOPIC_RISK_FLAGGED,
    TOPIC_COMPLIANCE_ACTION,
    TOPIC_OPS_ACTION,
    TOPIC_OPS_ALERT,
    TOPIC_CUSTOMER_MESSAGE,
    TOPIC_LOG_LINE,
    TOPIC_USER_QUERY,
    TOPIC_USER_RESPONSE,
    TOPIC_PRIVACY_VIOLATION,
];

/// Membership check against the closed vocabulary.
pub fn is_known_topic(kind: &str) -> bool {
    ALL_TOPICS.contains(&kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_is_closed() {
        assert!(is_known_topic("transaction.created"));
        assert!(is_known_topic("ops.alert"));
        assert!(!is_known_topic("transaction.deleted"));
        assert!(!is_known_topic(""));
    }

    #[test]
    fn all_topics_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for t in ALL_TOPICS {
            assert!(seen.insert(t), "duplicate topic {t}");
        }
    }
}
