use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use vigil_model::{ModelClient, ModelError};

use crate::{
    chunker, lexical, DocumentChunk, IngestError, MetadataFilter, ScoredChunk, SearchError,
    SearchResponse, SourceDocument,
};

#[derive(Debug, Clone)]
pub struct RetrievalIndexConfig {
    pub chunk_size_chars: usize,
    pub chunk_overlap_chars: usize,
    /// Below this chunk count, exact brute-force scoring is mandatory.
    /// The index stays exact above it too; the knob is kept so an ANN
    /// structure can be slotted in without an interface change.
    pub exact_ceiling_chunks: usize,
}

impl Default for RetrievalIndexConfig {
    fn default() -> Self {
        Self {
            chunk_size_chars: 1000,
            chunk_overlap_chars: 200,
            exact_ceiling_chunks: 100_000,
        }
    }
}

/// Immutable view of the chunk store. Readers clone the `Arc` and keep
/// scoring against it even while a new snapshot is being built.
pub(crate) struct Snapshot {
    pub(crate) docs: BTreeMap<String, Vec<Arc<DocumentChunk>>>,
    pub(crate) chunk_count: usize,
    /// token -> number of chunks containing it, for the lexical fallback
    pub(crate) doc_freq: HashMap<String, usize>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            docs: BTreeMap::new(),
            chunk_count: 0,
            doc_freq: HashMap::new(),
        }
    }

    pub(crate) fn iter_chunks(&self) -> impl Iterator<Item = &Arc<DocumentChunk>> {
        self.docs.values().flatten()
    }
}

/// Per-document ingestion outcome. Chunk failures do not abort the batch;
/// the index remains usable with whatever embedded successfully.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks_stored: usize,
    pub failures: Vec<ChunkFailure>,
}

#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub ordinal: u32,
    pub reason: String,
}

/// In-memory chunk store with atomic snapshot swap. Reads are lock-free
/// apart from the pointer clone; writes serialize on `swap_active`.
pub struct RetrievalIndex {
    model: Arc<dyn ModelClient>,
    snapshot: RwLock<Arc<Snapshot>>,
    swap_active: AtomicBool,
    cfg: RetrievalIndexConfig,
}

impl RetrievalIndex {
    pub fn new(model: Arc<dyn ModelClient>, cfg: RetrievalIndexConfig) -> Self {
        Self {
            model,
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
            swap_active: AtomicBool::new(false),
            cfg,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.current().chunk_count
    }

    pub fn document_count(&self) -> usize {
        self.current().docs.len()
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().expect("snapshot lock").clone()
    }

    /// Chunk, embed, and store one document. Re-ingesting a known
    /// `document_id` replaces all its chunks in a single observable step;
    /// reads served meanwhile see the pre-swap snapshot.
    pub async fn ingest(&self, doc: &SourceDocument) -> Result<IngestReport, IngestError> {
        if self.swap_active.swap(true, Ordering::SeqCst) {
            return Err(IngestError::SwapInProgress);
        }
        let report = self.ingest_inner(doc).await;
        self.swap_active.store(false, Ordering::SeqCst);
        Ok(report)
    }

    /// Sequentially ingest a whole corpus, e.g. at startup.
    pub async fn ingest_corpus(
        &self,
        docs: &[SourceDocument],
    ) -> Result<Vec<IngestReport>, IngestError> {
        let mut reports = Vec::with_capacity(docs.len());
        for doc in docs {
            reports.push(self.ingest(doc).await?);
        }
        Ok(reports)
    }

    async fn ingest_inner(&self, doc: &SourceDocument) -> IngestReport {
        let windows = chunker::chunk_text(
            &doc.content,
            self.cfg.chunk_size_chars,
            self.cfg.chunk_overlap_chars,
        );
        let metadata = crate::ChunkMetadata {
            regulator: doc.regulator.clone(),
            doc_type: doc.doc_type.clone(),
            sections: doc.sections.clone(),
            agent_focus: doc.agent_focus.clone(),
        };

        let mut chunks: Vec<Arc<DocumentChunk>> = Vec::with_capacity(windows.len());
        let mut failures = Vec::new();
        for (i, text) in windows.into_iter().enumerate() {
            let ordinal = i as u32;
            match self.model.embed(&text).await {
                Ok(embedding) => chunks.push(Arc::new(DocumentChunk {
                    chunk_id: chunk_id(&doc.document_id, ordinal, &text),
                    document_id: doc.document_id.clone(),
                    ordinal,
                    text,
                    embedding,
                    metadata: metadata.clone(),
                })),
                Err(e) => {
                    warn!(document_id = %doc.document_id, ordinal, error = %e, "chunk embed failed");
                    failures.push(ChunkFailure {
                        ordinal,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let stored = chunks.len();
        // Build the replacement snapshot off to the side, then swap once.
        let prev = self.current();
        let mut docs_map = prev.docs.clone();
        docs_map.insert(doc.document_id.clone(), chunks);
        let next = build_snapshot(docs_map);
        *self.snapshot.write().expect("snapshot lock") = Arc::new(next);

        info!(document_id = %doc.document_id, stored, failed = failures.len(), "document ingested");
        IngestReport {
            document_id: doc.document_id.clone(),
            chunks_stored: stored,
            failures,
        }
    }

    /// Exact k-NN by cosine over the filtered subset, falling back to
    /// lexical scoring when the embedding endpoint is unavailable after
    /// the adapter's retries.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<SearchResponse, SearchError> {
        let snap = self.current();
        if snap.chunk_count > self.cfg.exact_ceiling_chunks {
            debug!(
                chunks = snap.chunk_count,
                ceiling = self.cfg.exact_ceiling_chunks,
                "corpus above exact ceiling; still scoring exhaustively"
            );
        }
        match self.model.embed(query).await {
            Ok(query_vec) => {
                let mut scored: Vec<ScoredChunk> = snap
                    .iter_chunks()
                    .filter(|c| filter.matches(&c.metadata))
                    .map(|c| ScoredChunk {
                        chunk: Arc::clone(c),
                        score: cosine(&query_vec, &c.embedding),
                    })
                    .collect();
                rank_and_truncate(&mut scored, k);
                Ok(SearchResponse {
                    results: scored,
                    degraded: false,
                })
            }
            Err(ModelError::Unavailable(reason)) => {
                warn!(%reason, "embeddings unavailable; serving lexical fallback");
                Ok(SearchResponse {
                    results: lexical::search(&snap, query, k, filter),
                    degraded: true,
                })
            }
            Err(e) => Err(SearchError::Model(e)),
        }
    }
}

fn build_snapshot(docs: BTreeMap<String, Vec<Arc<DocumentChunk>>>) -> Snapshot {
    let mut chunk_count = 0usize;
    let mut doc_freq: HashMap<String, usize> = HashMap::new();
    for chunk in docs.values().flatten() {
        chunk_count += 1;
        let tokens: HashSet<String> = lexical::content_tokens(&chunk.text).into_iter().collect();
        for token in tokens {
            *doc_freq.entry(token).or_insert(0) += 1;
        }
    }
    Snapshot {
        docs,
        chunk_count,
        doc_freq,
    }
}

fn chunk_id(document_id: &str, ordinal: u32, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(ordinal.to_be_bytes());
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{document_id}-{ordinal:04}-{}", &digest[..12])
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Descending similarity, ties broken by ascending `(document_id, ordinal)`
/// so results are reproducible.
pub(crate) fn rank_and_truncate(scored: &mut Vec<ScoredChunk>, k: usize) {
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
            .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
    });
    scored.truncate(k);
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_model::testing::ScriptedClient;

    const DIM: usize = 64;

    fn doc(id: &str, regulator: &str, content: &str) -> SourceDocument {
        SourceDocument {
            document_id: id.into(),
            title: id.into(),
            regulator: regulator.into(),
            doc_type: "guidance".into(),
            sections: vec![],
            agent_focus: vec!["risk".into()],
            content: content.into(),
        }
    }

    fn index_with_client() -> (RetrievalIndex, Arc<ScriptedClient>) {
        let client = Arc::new(ScriptedClient::new(DIM));
        let index = RetrievalIndex::new(client.clone(), RetrievalIndexConfig::default());
        (index, client)
    }

    #[tokio::test]
    async fn search_ranks_by_similarity_and_respects_k() {
        let (index, _) = index_with_client();
        index
            .ingest(&doc(
                "aml",
                "AUSTRAC",
                "suspicious transaction monitoring thresholds for reporting entities",
            ))
            .await
            .unwrap();
        index
            .ingest(&doc(
                "complaints",
                "AFCA",
                "customer complaint handling and dispute resolution guidelines",
            ))
            .await
            .unwrap();

        let out = index
            .search("transaction monitoring thresholds", 1, &MetadataFilter::any())
            .await
            .unwrap();
        assert!(!out.degraded);
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].chunk.document_id, "aml");
    }

    #[tokio::test]
    async fn reingest_replaces_previous_chunks() {
        let (index, _) = index_with_client();
        let long = "one sentence here. ".repeat(200);
        index.ingest(&doc("d1", "APRA", &long)).await.unwrap();
        let first_count = index.chunk_count();
        assert!(first_count > 1);

        index
            .ingest(&doc("d1", "APRA", "just one small body now."))
            .await
            .unwrap();
        assert_eq!(index.chunk_count(), 1);
        assert_eq!(index.document_count(), 1);
    }

    #[tokio::test]
    async fn filtered_out_chunks_never_appear() {
        let (index, _) = index_with_client();
        index
            .ingest(&doc("austrac-1", "AUSTRAC", "aml ctf obligations and thresholds"))
            .await
            .unwrap();
        index
            .ingest(&doc("afca-1", "AFCA", "aml ctf obligations and thresholds"))
            .await
            .unwrap();

        let out = index
            .search(
                "aml obligations",
                10,
                &MetadataFilter::regulators(["AUSTRAC"]),
            )
            .await
            .unwrap();
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].chunk.metadata.regulator, "AUSTRAC");
    }

    #[tokio::test]
    async fn ties_break_on_document_id_then_ordinal() {
        let (index, _) = index_with_client();
        // identical text -> identical embeddings -> identical scores
        index.ingest(&doc("b-doc", "APRA", "same words")).await.unwrap();
        index.ingest(&doc("a-doc", "APRA", "same words")).await.unwrap();

        let out = index
            .search("same words", 2, &MetadataFilter::any())
            .await
            .unwrap();
        assert_eq!(out.results[0].chunk.document_id, "a-doc");
        assert_eq!(out.results[1].chunk.document_id, "b-doc");
    }

    #[tokio::test]
    async fn empty_corpus_returns_empty() {
        let (index, _) = index_with_client();
        let out = index
            .search("anything", 5, &MetadataFilter::any())
            .await
            .unwrap();
        assert!(out.results.is_empty());
        assert!(!out.degraded);
    }

    #[tokio::test]
    async fn lexical_fallback_is_flagged_and_ranked() {
        let (index, client) = index_with_client();
        index
            .ingest(&doc(
                "aml",
                "AUSTRAC",
                "suspicious matter reporting obligations under the aml ctf act",
            ))
            .await
            .unwrap();
        index
            .ingest(&doc("ops", "APRA", "operational resilience incident management"))
            .await
            .unwrap();

        client.set_embeddings_down(true);
        let out = index
            .search("suspicious matter reporting", 5, &MetadataFilter::any())
            .await
            .unwrap();
        assert!(out.degraded);
        assert_eq!(out.results[0].chunk.document_id, "aml");

        // a query of nothing but stop-words finds nothing, without error
        let out = index
            .search("the of and", 5, &MetadataFilter::any())
            .await
            .unwrap();
        assert!(out.degraded);
        assert!(out.results.is_empty());
    }

    #[tokio::test]
    async fn chunk_failures_are_reported_not_fatal() {
        let (index, client) = index_with_client();
        // every embed fails -> zero chunks stored but a usable report
        client.set_embeddings_down(true);
        let report = index.ingest(&doc("d", "APRA", "short body.")).await.unwrap();
        assert_eq!(report.chunks_stored, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(index.chunk_count(), 0);
    }

    #[test]
    fn chunk_ids_are_stable_and_distinct() {
        let a = chunk_id("doc", 0, "text");
        let b = chunk_id("doc", 0, "text");
        let c = chunk_id("doc", 1, "text");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("doc-0000-"));
    }
}
