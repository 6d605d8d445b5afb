//! Lexical fallback: token-overlap scoring with IDF weighting, used when
//! the embedding endpoint is unreachable.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::index::Snapshot;
use crate::{MetadataFilter, ScoredChunk};

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have",
        "in", "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were",
        "which", "will", "with",
    ]
    .into_iter()
    .collect()
});

/// Lowercased alphanumeric tokens with stop-words removed.
pub fn content_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .filter(|t| !STOP_WORDS.contains(t.as_str()))
        .collect()
}

/// Score the filtered subset by summed IDF of overlapping tokens. An
/// all-stop-word query scores nothing and returns empty.
pub fn search(snap: &Snapshot, query: &str, k: usize, filter: &MetadataFilter) -> Vec<ScoredChunk> {
    let query_tokens: HashSet<String> = content_tokens(query).into_iter().collect();
    if query_tokens.is_empty() {
        return Vec::new();
    }
    let total = snap.chunk_count.max(1) as f32;

    let mut scored: Vec<ScoredChunk> = Vec::new();
    for chunk in snap.iter_chunks() {
        if !filter.matches(&chunk.metadata) {
            continue;
        }
        let chunk_tokens: HashSet<String> = content_tokens(&chunk.text).into_iter().collect();
        let mut score = 0.0f32;
        for token in query_tokens.intersection(&chunk_tokens) {
            let df = snap.doc_freq.get(token).copied().unwrap_or(0) as f32;
            score += (1.0 + total / (1.0 + df)).ln();
        }
        if score > 0.0 {
            scored.push(ScoredChunk {
                chunk: Arc::clone(chunk),
                score,
            });
        }
    }
    super::index::rank_and_truncate(&mut scored, k);
    scored
}
