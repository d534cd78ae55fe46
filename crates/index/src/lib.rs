//! Graph persistence: the store trait, its Neo4j and in-memory
//! implementations, and chunk embeddings.

pub mod embeddings;
pub mod memory;
pub mod neo4j_index;
pub mod store;

pub use embeddings::{cosine_similarity, EmbeddingClient};
pub use memory::MemoryStore;
pub use neo4j_index::Neo4jStore;
pub use store::{sanitize_identifier, GraphStats, GraphStore, ScoredChunk};

use anyhow::{Context, Result};
use extract::GraphDocument;
use ingest::ProcessedDocument;
use std::sync::Arc;
use tracing::info;

/// Embeds a mined document's chunks and persists it with its graph.
pub struct Indexer {
    store: Arc<dyn GraphStore>,
    embeddings: Option<EmbeddingClient>,
}

impl Indexer {
    pub fn new(store: Arc<dyn GraphStore>, embeddings: Option<EmbeddingClient>) -> Self {
        Self { store, embeddings }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Index one document. The document graph is the union of its chunk
    /// graphs; a conflict between chunks fails the whole document.
    pub async fn index_document(&self, doc: &mut ProcessedDocument) -> Result<GraphDocument> {
        if let Some(client) = &self.embeddings {
            client.embed_chunks(&mut doc.chunks).await?;
        }

        let graph = doc
            .graph()
            .with_context(|| format!("Failed to assemble graph of document {}", doc.filename))?;

        self.store.store_document(doc, &graph).await?;

        info!(
            doc_id = %doc.doc_id,
            chunks = doc.chunks.len(),
            nodes = graph.nodes.len(),
            relationships = graph.relationships.len(),
            "Indexed document"
        );
        Ok(graph)
    }

    pub async fn get_stats(&self) -> Result<GraphStats> {
        self.store.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{CanonicalNode, Properties};
    use ingest::{Chunk, DocumentFormat};

    fn node(id: &str, node_type: &str) -> CanonicalNode {
        CanonicalNode {
            id: id.to_string(),
            node_type: node_type.to_string(),
            properties: Properties::new(),
        }
    }

    #[tokio::test]
    async fn test_index_document_persists_union_of_chunks() {
        let indexer = Indexer::new(Arc::new(MemoryStore::default()), None);
        let mut doc = ProcessedDocument::new("a.txt", DocumentFormat::PlainText, "Rome. Milan.".to_string());
        let mut first = Chunk::new(doc.doc_id.clone(), 0, "Rome.".to_string(), 10, 0);
        first.nodes = vec![node("Rome", "City")];
        let mut second = Chunk::new(doc.doc_id.clone(), 1, "Milan.".to_string(), 10, 0);
        second.nodes = vec![node("Milan", "City"), node("Rome", "City")];
        doc.chunks = vec![first, second];

        let graph = indexer.index_document(&mut doc).await.unwrap();
        assert_eq!(graph.nodes.len(), 2);

        let stats = indexer.get_stats().await.unwrap();
        assert_eq!(stats.labels["City"], 2);
        assert_eq!(stats.chunks, 2);
    }

    #[tokio::test]
    async fn test_conflicting_chunks_fail_the_document() {
        let indexer = Indexer::new(Arc::new(MemoryStore::default()), None);
        let mut doc = ProcessedDocument::new("a.txt", DocumentFormat::PlainText, String::new());
        let mut first = Chunk::new(doc.doc_id.clone(), 0, "a".to_string(), 10, 0);
        first.nodes = vec![node("Jordan", "Person")];
        let mut second = Chunk::new(doc.doc_id.clone(), 1, "b".to_string(), 10, 0);
        second.nodes = vec![node("Jordan", "Country")];
        doc.chunks = vec![first, second];

        assert!(indexer.index_document(&mut doc).await.is_err());
        assert_eq!(indexer.get_stats().await.unwrap().documents, 0);
    }
}
