use anyhow::Result;
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The single configuration record for the core. Every field has a serde
/// default so a partial TOML file (or none at all) yields a working setup.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// Embedding dimension D; every stored chunk and every query vector
    /// must match it exactly.
    pub embedding_dimension: usize,
    pub chunk_size_chars: usize,
    pub chunk_overlap_chars: usize,
    pub subscriber_queue_depth: usize,
    pub publish_backpressure_deadline_ms: u64,
    pub model_complete_timeout_ms: u64,
    pub model_embed_timeout_ms: u64,
    pub model_retry_attempts: u32,
    pub handler_timeout_ms: u64,
    pub context_ttl_ms: u64,
    pub risk_score_flag_threshold: f64,
    pub compliance_block_threshold: f64,
    pub compliance_hold_threshold: f64,
    pub knowledge_quiet_period_ms: u64,
    pub retrieval_top_k: usize,
    pub retrieval_exact_ceiling_chunks: usize,
    /// Absolute amount (in the account's currency) past which a transaction
    /// carries the full amount weight in the risk score.
    pub risk_amount_threshold: f64,
    /// Jurisdiction treated as domestic by the cross-border check.
    pub home_jurisdiction: String,
    /// Sentiment score at or below which an ops alert is raised.
    pub sentiment_alert_threshold: f64,
    /// Directory of JSON regulatory documents ingested at startup.
    pub corpus_dir: Option<String>,
    /// When set, dead letters are appended here as JSONL on shutdown.
    pub dead_letter_dump_path: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: 768,
            chunk_size_chars: 1000,
            chunk_overlap_chars: 200,
            subscriber_queue_depth: 1024,
            publish_backpressure_deadline_ms: 2000,
            model_complete_timeout_ms: 30_000,
            model_embed_timeout_ms: 10_000,
            model_retry_attempts: 5,
            handler_timeout_ms: 30_000,
            context_ttl_ms: 600_000,
            risk_score_flag_threshold: 0.8,
            compliance_block_threshold: 0.95,
            compliance_hold_threshold: 0.9,
            knowledge_quiet_period_ms: 5000,
            retrieval_top_k: 5,
            retrieval_exact_ceiling_chunks: 100_000,
            risk_amount_threshold: 10_000.0,
            home_jurisdiction: "AU".to_string(),
            sentiment_alert_threshold: -0.5,
            corpus_dir: None,
            dead_letter_dump_path: None,
        }
    }
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(CoreConfig);
    let schema_value = serde_json::to_value(&schema).expect("schema value");
    validator_for(&schema_value).expect("valid schema")
});

/// Returns the JSON schema describing the configuration structure.
///
/// # Panics
///
/// Panics if schema generation fails; this indicates a programming error.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(CoreConfig);
    serde_json::to_value(&schema).expect("schema json")
}

/// Load and validate a TOML config file. Unknown keys fail validation so a
/// typo cannot silently fall back to a default.
pub fn load_config(path: &str) -> Result<CoreConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<CoreConfig> {
    let raw: toml::Value = toml::from_str(content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: CoreConfig = toml::from_str(content)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.embedding_dimension, 768);
        assert_eq!(cfg.subscriber_queue_depth, 1024);
        assert_eq!(cfg.model_retry_attempts, 5);
        assert!((cfg.risk_score_flag_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(cfg.context_ttl_ms, 600_000);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg = parse_config("embedding_dimension = 384\nretrieval_top_k = 3\n").unwrap();
        assert_eq!(cfg.embedding_dimension, 384);
        assert_eq!(cfg.retrieval_top_k, 3);
        assert_eq!(cfg.chunk_size_chars, 1000);
    }

    #[test]
    fn wrong_type_is_rejected() {
        assert!(parse_config("embedding_dimension = \"big\"\n").is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse_config("embeding_dimension = 768\n").is_err());
    }

    #[test]
    fn schema_is_generatable() {
        let schema = config_schema_json();
        assert!(schema.get("properties").is_some() || schema.get("$defs").is_some());
    }
}
