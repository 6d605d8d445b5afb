use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use vigil_model::{ChatRequest, ModelClient};
use vigil_protocol::{Event, Payload, UserResponse};
use vigil_retrieval::{MetadataFilter, RetrievalIndex};
use vigil_topics as topics;

use crate::context::{citations_from, context_block};
use crate::{wrong_payload, Agent, AgentError};

/// Stateless Q&A over the regulatory corpus: retrieve, ground, answer.
pub struct AssistantAgent {
    model: Arc<dyn ModelClient>,
    index: Arc<RetrievalIndex>,
    top_k: usize,
}

impl AssistantAgent {
    pub fn new(model: Arc<dyn ModelClient>, index: Arc<RetrievalIndex>, top_k: usize) -> Self {
        Self {
            model,
            index,
            top_k,
        }
    }
}

#[async_trait]
impl Agent for AssistantAgent {
    fn name(&self) -> &'static str {
        "assistant-agent"
    }

    fn topics(&self) -> &'static [&'static str] {
        &[topics::TOPIC_USER_QUERY]
    }

    async fn handle(&self, event: &Event) -> Result<Vec<Event>, AgentError> {
        let Payload::UserQuery(query) = &event.payload else {
            return Err(wrong_payload(self.name(), event));
        };

        let retrieved = match self
            .index
            .search(&query.question, self.top_k, &MetadataFilter::any())
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "assistant retrieval failed");
                Default::default()
            }
        };
        let citations = citations_from(&retrieved);

        let request = ChatRequest::new(format!(
            "Context:\n{}\n\nQuestion: {}\n\nAnswer concisely for a banking professional, using \
             the context where relevant.",
            context_block(&retrieved),
            query.question
        ))
        .with_system("You are a regulatory affairs assistant for an Australian bank.");

        let answer_text = match self.model.complete(request).await {
            Ok(completion) => completion.text,
            Err(e) => {
                // degrade to a raw excerpt listing rather than dropping the reply
                warn!(error = %e, "model unavailable; answering with raw excerpts");
                if retrieved.results.is_empty() {
                    "(model unavailable; no matching guidance found)".to_string()
                } else {
                    let excerpts: Vec<String> = retrieved
                        .results
                        .iter()
                        .map(|s| {
                            let text: String = s.chunk.text.chars().take(200).collect();
                            format!("- {text}")
                        })
                        .collect();
                    format!(
                        "(model unavailable) Closest guidance:\n{}",
                        excerpts.join("\n")
                    )
                }
            }
        };

        Ok(vec![Event::new(
            event.correlation_id.clone(),
            self.name(),
            Payload::UserResponse(UserResponse {
                query_id: query.query_id.clone(),
                answer_text,
                citations,
            }),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_model::testing::ScriptedClient;
    use vigil_retrieval::{RetrievalIndexConfig, SourceDocument};
    use vigil_protocol::UserQuery;

    fn query_event(question: &str) -> Event {
        Event::new(
            "c-q",
            "web",
            Payload::UserQuery(UserQuery {
                query_id: "q-1".into(),
                question: question.into(),
            }),
        )
    }

    async fn seeded() -> (Arc<ScriptedClient>, Arc<RetrievalIndex>) {
        let model = Arc::new(ScriptedClient::new(32));
        let index = Arc::new(RetrievalIndex::new(
            model.clone(),
            RetrievalIndexConfig::default(),
        ));
        index
            .ingest(&SourceDocument {
                document_id: "aml-thresholds".into(),
                title: "Thresholds".into(),
                regulator: "AUSTRAC".into(),
                doc_type: "guidance".into(),
                sections: vec![],
                agent_focus: vec![],
                content: "Threshold transaction reports apply to transfers of ten thousand \
                          dollars or more."
                    .into(),
            })
            .await
            .unwrap();
        (model, index)
    }

    #[tokio::test]
    async fn answers_carry_citations() {
        let (model, index) = seeded().await;
        model.push_completion("Reports are required at ten thousand dollars.");
        let agent = AssistantAgent::new(model, index, 5);

        let out = agent
            .handle(&query_event("when are threshold reports required"))
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        let Payload::UserResponse(resp) = &out[0].payload else {
            panic!("expected user.response");
        };
        assert_eq!(resp.query_id, "q-1");
        assert_eq!(resp.answer_text, "Reports are required at ten thousand dollars.");
        assert_eq!(resp.citations.len(), 1);
        assert_eq!(resp.citations[0].document_id, "aml-thresholds");
    }

    #[tokio::test]
    async fn model_outage_degrades_to_excerpts() {
        let (model, index) = seeded().await;
        model.set_completions_down(true);
        let agent = AssistantAgent::new(model, index, 5);

        let out = agent
            .handle(&query_event("threshold transaction reports"))
            .await
            .unwrap();
        let Payload::UserResponse(resp) = &out[0].payload else {
            panic!("expected user.response");
        };
        assert!(resp.answer_text.starts_with("(model unavailable)"));
        assert!(resp.answer_text.contains("Threshold transaction reports"));
    }
}
