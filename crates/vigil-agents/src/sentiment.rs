use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use vigil_model::{ChatRequest, ModelClient};
use vigil_protocol::{Event, OpsAlert, Payload};
use vigil_topics as topics;

use crate::{wrong_payload, Agent, AgentError};

const NEGATIVE_WORDS: &[&str] = &[
    "angry",
    "awful",
    "disappointed",
    "error",
    "frustrated",
    "hate",
    "issue",
    "problem",
    "ridiculous",
    "scam",
    "stolen",
    "terrible",
    "unacceptable",
    "unauthorised",
    "unauthorized",
    "worst",
];

const POSITIVE_WORDS: &[&str] = &[
    "amazing",
    "excellent",
    "good",
    "great",
    "happy",
    "helpful",
    "love",
    "perfect",
    "satisfied",
    "thank",
    "thanks",
];

/// Keyword scorer used when the model cannot be constrained to a numeric
/// reply. Returns (positive - negative) / total hits, 0.0 with no hits.
pub fn lexicon_score(body: &str) -> f64 {
    let lower = body.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let negatives = tokens
        .iter()
        .filter(|t| NEGATIVE_WORDS.contains(*t))
        .count() as f64;
    let positives = tokens
        .iter()
        .filter(|t| POSITIVE_WORDS.contains(*t))
        .count() as f64;
    if negatives + positives == 0.0 {
        return 0.0;
    }
    (positives - negatives) / (positives + negatives)
}

fn parse_score(reply: &str) -> Option<f64> {
    let score: f64 = reply.split_whitespace().next()?.parse().ok()?;
    (-1.0..=1.0).contains(&score).then_some(score)
}

/// Scores `customer.message` bodies in [-1, 1] and alerts operations on
/// strongly negative sentiment.
pub struct SentimentAgent {
    model: Arc<dyn ModelClient>,
    alert_threshold: f64,
}

impl SentimentAgent {
    pub fn new(model: Arc<dyn ModelClient>, alert_threshold: f64) -> Self {
        Self {
            model,
            alert_threshold,
        }
    }
}

#[async_trait]
impl Agent for SentimentAgent {
    fn name(&self) -> &'static str {
        "sentiment-agent"
    }

    fn topics(&self) -> &'static [&'static str] {
        &[topics::TOPIC_CUSTOMER_MESSAGE]
    }

    async fn handle(&self, event: &Event) -> Result<Vec<Event>, AgentError> {
        let Payload::CustomerMessage(message) = &event.payload else {
            return Err(wrong_payload(self.name(), event));
        };

        let request = ChatRequest::new(format!(
            "Score the sentiment of this customer message. Reply with only a decimal between \
             -1.0 (hostile) and 1.0 (delighted).\n\nMessage: {}",
            message.body
        ))
        .with_system("You are a customer-experience analyst.");

        let score = match self.model.complete(request).await {
            Ok(completion) => match parse_score(&completion.text) {
                Some(score) => score,
                None => {
                    warn!(reply = %completion.text, "non-numeric sentiment reply; using lexicon");
                    lexicon_score(&message.body)
                }
            },
            Err(e) => {
                warn!(error = %e, "model unavailable for sentiment; using lexicon");
                lexicon_score(&message.body)
            }
        };

        if score > self.alert_threshold {
            return Ok(vec![]);
        }

        let excerpt: String = message.body.chars().take(120).collect();
        let suggested_action = if score <= -0.8 {
            "escalate_to_team_lead"
        } else {
            "follow_up_with_customer"
        };
        Ok(vec![Event::new(
            event.correlation_id.clone(),
            self.name(),
            Payload::OpsAlert(OpsAlert::Sentiment {
                sentiment_score: score,
                excerpt,
                suggested_action: suggested_action.to_string(),
            }),
        )])
    }
}
