use anyhow::{Context, Result};
use async_trait::async_trait;
use extract::GraphDocument;
use ingest::{Chunk, ProcessedDocument};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use crate::embeddings::cosine_similarity;
use crate::store::{GraphStats, GraphStore, ScoredChunk};

#[derive(Default)]
struct MemoryState {
    documents: BTreeMap<String, String>,
    /// Keyed by (doc_id, chunk index)
    chunks: BTreeMap<(String, usize), Chunk>,
    graph: GraphDocument,
}

/// A [`GraphStore`] kept entirely in memory. Every document write happens
/// under a single write lock.
pub struct MemoryStore {
    index_name: String,
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            state: RwLock::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("chunk_embeddings")
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn store_document(&self, doc: &ProcessedDocument, graph: &GraphDocument) -> Result<()> {
        let mut state = self.state.write().await;

        // Merge first so a conflict leaves the store untouched
        let merged = state
            .graph
            .merge(graph)
            .with_context(|| format!("Failed to store graph of document {}", doc.filename))?;
        state.graph = GraphDocument {
            source: String::new(),
            ..merged
        };

        state.documents.insert(doc.doc_id.clone(), doc.filename.clone());
        state.chunks.retain(|(doc_id, _), _| *doc_id != doc.doc_id);
        for chunk in &doc.chunks {
            state
                .chunks
                .insert((chunk.doc_id.clone(), chunk.index), chunk.clone());
        }

        debug!(
            doc_id = %doc.doc_id,
            nodes = graph.nodes.len(),
            relationships = graph.relationships.len(),
            "Stored document in memory"
        );
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats> {
        let state = self.state.read().await;
        let mut stats = GraphStats {
            documents: state.documents.len(),
            chunks: state.chunks.len(),
            ..Default::default()
        };
        for node in &state.graph.nodes {
            *stats.labels.entry(node.node_type.clone()).or_default() += 1;
        }
        for rel in &state.graph.relationships {
            *stats.relationship_types.entry(rel.rel_type.clone()).or_default() += 1;
        }
        Ok(stats)
    }

    fn index_name(&self) -> &str {
        &self.index_name
    }

    async fn similar_chunks(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let state = self.state.read().await;
        let mut scored: Vec<ScoredChunk> = state
            .chunks
            .values()
            .filter_map(|chunk| {
                let score = cosine_similarity(chunk.embedding.as_deref()?, embedding);
                Some(ScoredChunk {
                    chunk: chunk.clone(),
                    score,
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn export_graph(&self) -> Result<GraphDocument> {
        let state = self.state.read().await;
        let mut graph = state.graph.clone();
        graph.nodes.sort_by(|a, b| a.id.cmp(&b.id));
        graph.relationships.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(graph)
    }

    async fn chunks_for_entities(&self, entity_ids: &[String]) -> Result<Vec<Chunk>> {
        let wanted: BTreeSet<&str> = entity_ids.iter().map(String::as_str).collect();
        let state = self.state.read().await;
        Ok(state
            .chunks
            .values()
            .filter(|chunk| chunk.nodes.iter().any(|n| wanted.contains(n.id.as_str())))
            .cloned()
            .collect())
    }

    async fn write_communities(
        &self,
        community_type: &str,
        assignments: &HashMap<String, usize>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        for node in &mut state.graph.nodes {
            if let Some(community) = assignments.get(&node.id) {
                node.properties
                    .insert(community_type.to_string(), community.to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{CanonicalNode, CanonicalRelationship, Properties};
    use ingest::DocumentFormat;

    fn node(id: &str, node_type: &str) -> CanonicalNode {
        CanonicalNode {
            id: id.to_string(),
            node_type: node_type.to_string(),
            properties: Properties::new(),
        }
    }

    fn document(name: &str, text: &str, nodes: Vec<CanonicalNode>, rels: Vec<CanonicalRelationship>) -> ProcessedDocument {
        let mut doc = ProcessedDocument::new(name, DocumentFormat::PlainText, text.to_string());
        let mut chunk = Chunk::new(doc.doc_id.clone(), 0, text.to_string(), 100, 0);
        chunk.nodes = nodes;
        chunk.relationships = rels;
        doc.chunks = vec![chunk];
        doc
    }

    fn lives_in() -> CanonicalRelationship {
        CanonicalRelationship {
            source: "Marco Rossi".to_string(),
            target: "Rome".to_string(),
            rel_type: "LIVES_IN".to_string(),
            properties: Properties::new(),
        }
    }

    #[tokio::test]
    async fn test_store_and_stats() {
        let store = MemoryStore::default();
        let doc = document(
            "a.txt",
            "Marco Rossi lives in Rome.",
            vec![node("Marco Rossi", "Person"), node("Rome", "City")],
            vec![lives_in()],
        );
        store.store_document(&doc, &doc.graph().unwrap()).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.labels["Person"], 1);
        assert_eq!(stats.labels["City"], 1);
        assert_eq!(stats.relationship_types["LIVES_IN"], 1);
    }

    #[tokio::test]
    async fn test_conflicting_document_is_rejected_whole() {
        let store = MemoryStore::default();
        let first = document("a.txt", "Jordan.", vec![node("Jordan", "Person")], vec![]);
        store.store_document(&first, &first.graph().unwrap()).await.unwrap();

        let second = document("b.txt", "Jordan. Amman.", vec![node("Jordan", "Country"), node("Amman", "City")], vec![]);
        assert!(store.store_document(&second, &second.graph().unwrap()).await.is_err());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.entity_count(), 1);
    }

    #[tokio::test]
    async fn test_chunks_for_entities_and_communities() {
        let store = MemoryStore::default();
        let a = document("a.txt", "Rome.", vec![node("Rome", "City")], vec![]);
        let b = document("b.txt", "Milan.", vec![node("Milan", "City")], vec![]);
        store.store_document(&a, &a.graph().unwrap()).await.unwrap();
        store.store_document(&b, &b.graph().unwrap()).await.unwrap();

        let chunks = store.chunks_for_entities(&["Milan".to_string()]).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Milan.");

        let assignments = HashMap::from([("Rome".to_string(), 0), ("Milan".to_string(), 1)]);
        store.write_communities("louvain", &assignments).await.unwrap();
        let graph = store.export_graph().await.unwrap();
        assert_eq!(graph.nodes[0].id, "Milan");
        assert_eq!(graph.nodes[0].properties["louvain"], "1");
        assert_eq!(graph.nodes[1].properties["louvain"], "0");
    }

    #[tokio::test]
    async fn test_reingest_replaces_old_chunks() {
        let store = MemoryStore::default();
        let mut doc = document("a.txt", "Rome.", vec![node("Rome", "City")], vec![]);
        let mut second = Chunk::new(doc.doc_id.clone(), 1, "Milan.".to_string(), 100, 0);
        second.nodes = vec![node("Milan", "City")];
        doc.chunks.push(second);
        store.store_document(&doc, &doc.graph().unwrap()).await.unwrap();

        doc.chunks.truncate(1);
        store.store_document(&doc, &doc.graph().unwrap()).await.unwrap();

        assert_eq!(store.stats().await.unwrap().chunks, 1);
        let stale = store.chunks_for_entities(&["Milan".to_string()]).await.unwrap();
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn test_similar_chunks_ranks_by_cosine() {
        let store = MemoryStore::default();
        let mut a = document("a.txt", "Rome.", vec![], vec![]);
        a.chunks[0].set_embedding("m", vec![1.0, 0.0]);
        let mut b = document("b.txt", "Milan.", vec![], vec![]);
        b.chunks[0].set_embedding("m", vec![0.6, 0.8]);
        store.store_document(&a, &GraphDocument::default()).await.unwrap();
        store.store_document(&b, &GraphDocument::default()).await.unwrap();

        let hits = store.similar_chunks(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.text, "Milan.");
    }
}
