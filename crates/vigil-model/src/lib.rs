//! Uniform request/response to a chat-completion endpoint and a
//! text-embedding endpoint. Retry, deadline, and concurrency limits live in
//! [`ModelAdapter`]; the raw wire exchange lives behind [`ModelProvider`].

use async_trait::async_trait;

mod adapter;
mod http;
pub mod testing;

pub use adapter::{ModelAdapter, ModelAdapterConfig, ModelStats};
pub use http::{HttpProvider, HttpProviderConfig};

/// Failure taxonomy for both operations. `Unavailable` and `Throttled` are
/// retried by the adapter; `Rejected` and `Invalid` surface immediately.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("model endpoint unavailable: {0}")]
    Unavailable(String),
    #[error("model throttled: {0}")]
    Throttled(String),
    #[error("model rejected the request: {0}")]
    Rejected(String),
    #[error("model response invalid: {0}")]
    Invalid(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Unavailable(_) | ModelError::Throttled(_))
    }

    /// Transport-level only; the embed path retries nothing else.
    pub fn is_transport(&self) -> bool {
        matches!(self, ModelError::Unavailable(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// What handlers program against. The adapter implements it; tests swap in
/// [`testing::ScriptedClient`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, req: ChatRequest) -> Result<Completion, ModelError>;

    /// Returns a vector whose length must equal the configured dimension.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;
}

/// One raw exchange with the provider, no retries, no deadline. Kept
/// separate so the retry policy is testable without a network.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, req: ChatRequest) -> Result<Completion, ModelError>;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;
}
