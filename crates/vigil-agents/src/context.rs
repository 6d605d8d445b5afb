//! Helpers shared by the retrieval-backed handlers: citation extraction
//! and prompt-context assembly from search results.

use vigil_protocol::Citation;
use vigil_retrieval::SearchResponse;

/// One citation per distinct document, in result order.
pub(crate) fn citations_from(response: &SearchResponse) -> Vec<Citation> {
    let mut out: Vec<Citation> = Vec::new();
    for scored in &response.results {
        let chunk = &scored.chunk;
        if out.iter().any(|c| c.document_id == chunk.document_id) {
            continue;
        }
        out.push(Citation {
            document_id: chunk.document_id.clone(),
            regulator: chunk.metadata.regulator.clone(),
            doc_type: chunk.metadata.doc_type.clone(),
        });
    }
    out
}

/// Numbered excerpts for the prompt, capped so a long chunk cannot blow
/// out the context.
pub(crate) fn context_block(response: &SearchResponse) -> String {
    if response.results.is_empty() {
        return "No relevant regulatory guidance found.".to_string();
    }
    let mut parts = Vec::with_capacity(response.results.len());
    for (i, scored) in response.results.iter().enumerate() {
        let chunk = &scored.chunk;
        let excerpt: String = chunk.text.chars().take(500).collect();
        parts.push(format!(
            "[{}] {} ({}): {}",
            i + 1,
            chunk.metadata.regulator,
            chunk.document_id,
            excerpt
        ));
    }
    parts.join("\n\n")
}
