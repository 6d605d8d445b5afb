use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::SourceDocument;

/// On-disk shape of one regulatory document.
#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    document_id: Option<String>,
    title: String,
    regulator: String,
    document_type: String,
    #[serde(default)]
    sections: Vec<String>,
    #[serde(default)]
    agent_focus: Vec<String>,
    content: String,
}

/// Loads the corpus from a directory of JSON documents. A file that fails
/// to parse is skipped with a warning; the rest of the corpus still loads.
pub struct CorpusLoader {
    dir: PathBuf,
}

impl CorpusLoader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<Vec<SourceDocument>> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("reading corpus dir {}", self.dir.display()))?;
        let mut docs = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::load_file(&path) {
                Ok(doc) => docs.push(doc),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping corpus document"),
            }
        }
        // deterministic ingest order regardless of directory iteration
        docs.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        Ok(docs)
    }

    fn load_file(path: &Path) -> Result<SourceDocument> {
        let content = std::fs::read_to_string(path)?;
        let raw: RawDocument = serde_json::from_str(&content)?;
        let document_id = raw.document_id.unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("document")
                .to_string()
        });
        Ok(SourceDocument {
            document_id,
            title: raw.title,
            regulator: raw.regulator,
            doc_type: raw.document_type,
            sections: raw.sections,
            agent_focus: raw.agent_focus,
            content: raw.content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_orders_documents() {
        let dir = std::env::temp_dir().join(format!("vigil-corpus-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("b-doc.json"),
            r#"{"title":"Second","regulator":"APRA","document_type":"standard","content":"text b"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("a-doc.json"),
            r#"{"document_id":"aml-guide","title":"First","regulator":"AUSTRAC","document_type":"guidance","agent_focus":["risk"],"content":"text a"}"#,
        )
        .unwrap();
        std::fs::write(dir.join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let docs = CorpusLoader::new(&dir).load().unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].document_id, "aml-guide");
        assert_eq!(docs[1].document_id, "b-doc");
        assert_eq!(docs[0].agent_focus, vec!["risk".to_string()]);
    }
}
