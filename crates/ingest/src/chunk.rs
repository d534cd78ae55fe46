use extract::{CanonicalNode, CanonicalRelationship, GraphDocument};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A bounded span of a document's text, the unit of extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: String,
    pub chunk_id: String,
    /// Position of the chunk inside its document
    pub index: usize,
    pub text: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    #[serde(default)]
    pub embeddings_model: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub nodes: Vec<CanonicalNode>,
    #[serde(default)]
    pub relationships: Vec<CanonicalRelationship>,
}

impl Chunk {
    pub fn new(
        doc_id: String,
        index: usize,
        text: String,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        // Generate stable chunk_id from content
        let chunk_id = Self::generate_chunk_id(&doc_id, index, &text);

        Self {
            doc_id,
            chunk_id,
            index,
            text,
            chunk_size,
            chunk_overlap,
            embeddings_model: None,
            embedding: None,
            nodes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    fn generate_chunk_id(doc_id: &str, index: usize, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(doc_id.as_bytes());
        hasher.update(index.to_le_bytes());
        hasher.update(text.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16]) // Use first 16 bytes (32 hex chars)
    }

    pub fn has_graph(&self) -> bool {
        !self.nodes.is_empty()
    }

    pub fn set_graph(&mut self, graph: GraphDocument) {
        self.nodes = graph.nodes;
        self.relationships = graph.relationships;
    }

    pub fn clear_graph(&mut self) {
        self.nodes.clear();
        self.relationships.clear();
    }

    pub fn graph(&self) -> GraphDocument {
        GraphDocument {
            nodes: self.nodes.clone(),
            relationships: self.relationships.clone(),
            source: self.text.clone(),
        }
    }

    pub fn set_embedding(&mut self, model: &str, embedding: Vec<f32>) {
        self.embeddings_model = Some(model.to_string());
        self.embedding = Some(embedding);
    }
}
