use anyhow::Result;
use async_trait::async_trait;
use extract::GraphDocument;
use ingest::{Chunk, ProcessedDocument};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Counts of what a store currently holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub documents: usize,
    pub chunks: usize,
    /// Entity count per node label
    pub labels: BTreeMap<String, usize>,
    /// Relationship count per relationship type
    pub relationship_types: BTreeMap<String, usize>,
}

impl GraphStats {
    pub fn entity_count(&self) -> usize {
        self.labels.values().sum()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationship_types.values().sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Persistence for documents, their chunks and the canonical entity graph.
///
/// Layout: `(:Document)-[:HAS_CHUNK]->(:Chunk)-[:MENTIONS]->(:Entity)`, with
/// entity-to-entity relationships typed by their canonical type. Chunk
/// embeddings are searchable through the store's vector index.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Persist one document, its chunks and its graph as a single batch.
    /// Either everything is written or nothing is.
    async fn store_document(&self, doc: &ProcessedDocument, graph: &GraphDocument) -> Result<()>;

    async fn stats(&self) -> Result<GraphStats>;

    /// Name of the vector index over chunk embeddings.
    fn index_name(&self) -> &str;

    async fn similar_chunks(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>>;

    /// The whole stored entity graph, nodes and relationships ordered by id.
    async fn export_graph(&self) -> Result<GraphDocument>;

    /// Chunks mentioning any of the given entities, in document order.
    async fn chunks_for_entities(&self, entity_ids: &[String]) -> Result<Vec<Chunk>>;

    /// Record `entity_id -> community id` as the node property named
    /// `community_type`.
    async fn write_communities(
        &self,
        community_type: &str,
        assignments: &HashMap<String, usize>,
    ) -> Result<()>;
}

/// Make a label, relationship type or property key safe to interpolate
/// into Cypher between backticks.
pub fn sanitize_identifier(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
