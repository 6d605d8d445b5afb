use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ChatRequest, Completion, ModelError, ModelProvider};

#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// e.g. `https://api.example.com/v1`
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub embed_model: String,
}

/// OpenAI-compatible chat-completion and embedding endpoints. The api key
/// is injected at construction and never logged or serialized.
pub struct HttpProvider {
    client: reqwest::Client,
    cfg: HttpProviderConfig,
}

#[derive(Serialize)]
struct WireChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireChatResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Serialize)]
struct WireEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct WireEmbedResponse {
    data: Vec<WireEmbedding>,
}

#[derive(Deserialize)]
struct WireEmbedding {
    embedding: Vec<f32>,
}

impl HttpProvider {
    pub fn new(cfg: HttpProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            cfg,
        }
    }

    fn classify_status(status: reqwest::StatusCode, body: String) -> ModelError {
        if status.as_u16() == 429 {
            ModelError::Throttled(body)
        } else if status.is_server_error() {
            ModelError::Unavailable(format!("HTTP {status}: {body}"))
        } else {
            // 4xx other than throttling is the provider refusing the request.
            ModelError::Rejected(format!("HTTP {status}: {body}"))
        }
    }
}

#[async_trait]
impl ModelProvider for HttpProvider {
    async fn complete(&self, req: ChatRequest) -> Result<Completion, ModelError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = req.system.as_deref() {
            messages.push(WireMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(WireMessage {
            role: "user",
            content: &req.prompt,
        });
        let wire = WireChatRequest {
            model: &self.cfg.chat_model,
            messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&wire)
            .send()
            .await
            .map_err(|e| ModelError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let parsed: WireChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Invalid(format!("undecodable chat response: {e}")))?;
        let text = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| ModelError::Invalid("chat response has no choices".into()))?;
        Ok(Completion {
            text,
            prompt_tokens: parsed.usage.prompt_tokens,
            completion_tokens: parsed.usage.completion_tokens,
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let wire = WireEmbedRequest {
            model: &self.cfg.embed_model,
            input: text,
        };
        let response = self
            .client
            .post(format!("{}/embeddings", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&wire)
            .send()
            .await
            .map_err(|e| ModelError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let parsed: WireEmbedResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Invalid(format!("undecodable embed response: {e}")))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ModelError::Invalid("embed response has no data".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let e = HttpProvider::classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "rl".into());
        assert!(matches!(e, ModelError::Throttled(_)));
        let e = HttpProvider::classify_status(reqwest::StatusCode::BAD_GATEWAY, "down".into());
        assert!(matches!(e, ModelError::Unavailable(_)));
        let e = HttpProvider::classify_status(reqwest::StatusCode::BAD_REQUEST, "policy".into());
        assert!(matches!(e, ModelError::Rejected(_)));
    }
}
