//! Deterministic model client for tests across the workspace.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{ChatRequest, Completion, ModelClient, ModelError};

/// Scripted stand-in for the adapter: completions pop from a queue,
/// embeddings are a stable hash projection so similarity roughly tracks
/// token overlap.
pub struct ScriptedClient {
    dim: usize,
    completions: Mutex<VecDeque<Result<String, ModelError>>>,
    default_completion: String,
    complete_down: AtomicBool,
    embed_down: AtomicBool,
    prompts_seen: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            completions: Mutex::new(VecDeque::new()),
            default_completion: "ok".to_string(),
            complete_down: AtomicBool::new(false),
            embed_down: AtomicBool::new(false),
            prompts_seen: Mutex::new(Vec::new()),
        }
    }

    /// Every call on both operations fails `Unavailable`, as in a full
    /// provider outage.
    pub fn offline(dim: usize) -> Self {
        let c = Self::new(dim);
        c.complete_down.store(true, Ordering::SeqCst);
        c.embed_down.store(true, Ordering::SeqCst);
        c
    }

    pub fn with_default_completion(mut self, text: impl Into<String>) -> Self {
        self.default_completion = text.into();
        self
    }

    pub fn push_completion(&self, text: impl Into<String>) {
        self.completions
            .lock()
            .unwrap()
            .push_back(Ok(text.into()));
    }

    pub fn push_error(&self, err: ModelError) {
        self.completions.lock().unwrap().push_back(Err(err));
    }

    pub fn set_embeddings_down(&self, down: bool) {
        self.embed_down.store(down, Ordering::SeqCst);
    }

    pub fn set_completions_down(&self, down: bool) {
        self.complete_down.store(down, Ordering::SeqCst);
    }

    /// Prompts observed by `complete`, for assertions on prompt assembly.
    pub fn prompts_seen(&self) -> Vec<String> {
        self.prompts_seen.lock().unwrap().clone()
    }

    /// Stable bag-of-tokens projection into `dim` buckets. Shared tokens
    /// land in shared buckets, so cosine similarity orders by overlap.
    pub fn hash_embedding(dim: usize, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; dim.max(1)];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_ascii_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            for spread in 0..3u64 {
                let idx = (h.rotate_left((spread * 17) as u32) % dim.max(1) as u64) as usize;
                v[idx] += 1.0;
            }
        }
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0; // embeddings must have non-zero norm
        }
        v
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn complete(&self, req: ChatRequest) -> Result<Completion, ModelError> {
        if self.complete_down.load(Ordering::SeqCst) {
            return Err(ModelError::Unavailable("scripted outage".into()));
        }
        self.prompts_seen.lock().unwrap().push(req.prompt.clone());
        let next = self.completions.lock().unwrap().pop_front();
        let text = match next {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Err(e),
            None => self.default_completion.clone(),
        };
        Ok(Completion {
            prompt_tokens: req.prompt.split_whitespace().count() as u64,
            completion_tokens: text.split_whitespace().count() as u64,
            text,
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        if self.embed_down.load(Ordering::SeqCst) {
            return Err(ModelError::Unavailable("scripted outage".into()));
        }
        Ok(Self::hash_embedding(self.dim, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (na * nb)
    }

    #[test]
    fn hash_embedding_orders_by_overlap() {
        let q = ScriptedClient::hash_embedding(64, "transaction monitoring threshold");
        let near = ScriptedClient::hash_embedding(64, "threshold for transaction monitoring rules");
        let far = ScriptedClient::hash_embedding(64, "customer complaint handling guidelines");
        assert!(cosine(&q, &near) > cosine(&q, &far));
    }

    #[test]
    fn hash_embedding_never_zero() {
        let v = ScriptedClient::hash_embedding(16, "");
        assert!(v.iter().any(|x| *x != 0.0));
    }

    #[tokio::test]
    async fn scripted_completions_pop_in_order() {
        let c = ScriptedClient::new(8);
        c.push_completion("first");
        c.push_error(ModelError::Rejected("policy".into()));
        assert_eq!(
            c.complete(ChatRequest::new("a")).await.unwrap().text,
            "first"
        );
        assert!(matches!(
            c.complete(ChatRequest::new("b")).await,
            Err(ModelError::Rejected(_))
        ));
        // queue exhausted -> default
        assert_eq!(c.complete(ChatRequest::new("c")).await.unwrap().text, "ok");
    }
}
