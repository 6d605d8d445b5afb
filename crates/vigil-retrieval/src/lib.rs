//! Retrieval over the regulatory corpus: chunking, embedding, exact k-NN
//! with metadata filters, and a lexical fallback for when embeddings are
//! unavailable.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

mod chunker;
mod corpus;
mod index;
mod lexical;

pub use chunker::chunk_text;
pub use corpus::CorpusLoader;
pub use index::{ChunkFailure, IngestReport, RetrievalIndex, RetrievalIndexConfig};
pub use lexical::content_tokens;

/// Metadata carried by every chunk, used for filtering at query time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub regulator: String,
    pub doc_type: String,
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub agent_focus: Vec<String>,
}

/// The unit of retrieval. Owned by the index; callers only ever see
/// `Arc` views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: u32,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A source document before chunking: normalized text plus its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub document_id: String,
    pub title: String,
    pub regulator: String,
    pub doc_type: String,
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub agent_focus: Vec<String>,
    pub content: String,
}

/// Equality/set-membership filter over chunk metadata. `None` fields do
/// not constrain; listed values are ORed within a field and ANDed across
/// fields.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub regulator: Option<Vec<String>>,
    pub doc_type: Option<Vec<String>>,
    pub agent_focus: Option<Vec<String>>,
}

impl MetadataFilter {
    /// Matches everything.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn regulators<I, S>(regulators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            regulator: Some(regulators.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn matches(&self, meta: &ChunkMetadata) -> bool {
        if let Some(allowed) = &self.regulator {
            if !allowed.iter().any(|r| r == &meta.regulator) {
                return false;
            }
        }
        if let Some(allowed) = &self.doc_type {
            if !allowed.iter().any(|t| t == &meta.doc_type) {
                return false;
            }
        }
        if let Some(allowed) = &self.agent_focus {
            if !allowed.iter().any(|f| meta.agent_focus.contains(f)) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<DocumentChunk>,
    pub score: f32,
}

/// Ranked results. `degraded` is set when lexical fallback answered so
/// callers can downgrade confidence.
#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub results: Vec<ScoredChunk>,
    pub degraded: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Model(#[from] vigil_model::ModelError),
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("an ingestion swap is already active")]
    SwapInProgress,
}
