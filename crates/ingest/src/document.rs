use extract::{merge_graphs, GraphDocument, MergeConflictError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use crate::chunk::Chunk;

static HTML_DROP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("html drop pattern is valid")
});
static HTML_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(br|/p|/div|/h[1-6]|/li|/tr)\s*/?>").expect("html break pattern is valid")
});
static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("html tag pattern is valid"));

/// Document formats the reader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    PlainText,
    Markdown,
    Html,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "txt" | "text" => Some(Self::PlainText),
            "md" | "markdown" => Some(Self::Markdown),
            "html" | "htm" => Some(Self::Html),
            _ => None,
        }
    }

    /// Plain text content of a raw file in this format.
    pub fn extract_text(self, raw: &str) -> String {
        match self {
            Self::PlainText | Self::Markdown => raw.to_string(),
            Self::Html => {
                let text = HTML_DROP.replace_all(raw, "");
                let text = HTML_BREAK.replace_all(&text, "\n\n");
                let text = HTML_TAG.replace_all(&text, "");
                decode_entities(&text)
            }
        }
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// A document with its cleaned text and, once chunked, its chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub doc_id: String,
    pub filename: String,
    pub format: DocumentFormat,
    pub source: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

impl ProcessedDocument {
    pub fn new(filename: &str, format: DocumentFormat, source: String) -> Self {
        Self {
            doc_id: generate_doc_id(filename),
            filename: filename.to_string(),
            format,
            source,
            metadata: BTreeMap::new(),
            chunks: Vec::new(),
        }
    }

    pub fn chunk_texts(&self) -> Vec<&str> {
        self.chunks.iter().map(|c| c.text.as_str()).collect()
    }

    /// Union of every chunk's graph, merged in chunk order.
    pub fn graph(&self) -> Result<GraphDocument, MergeConflictError> {
        let graphs: Vec<GraphDocument> = self.chunks.iter().map(Chunk::graph).collect();
        let mut merged = merge_graphs(&graphs)?;
        merged.source = self.source.clone();
        Ok(merged)
    }
}

/// Generate a stable document ID from file path
pub fn generate_doc_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}
