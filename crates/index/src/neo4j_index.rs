use anyhow::{Context, Result};
use async_trait::async_trait;
use extract::{
    CanonicalNode, CanonicalRelationship, GraphDocument, MergeConflictError, Properties,
};
use ingest::{Chunk, ProcessedDocument};
use neo4rs::{Graph, Query};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::store::{sanitize_identifier, GraphStats, GraphStore, ScoredChunk};

/// Node properties that belong to the store, never to extracted data.
const RESERVED_KEYS: [&str; 2] = ["id", "type"];

pub struct Neo4jStore {
    graph: Graph,
    index_name: String,
}

impl Neo4jStore {
    pub fn new(graph: Graph, index_name: impl Into<String>) -> Self {
        Self {
            graph,
            index_name: sanitize_identifier(&index_name.into()),
        }
    }

    pub async fn connect(uri: &str, user: &str, password: &str, index_name: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .with_context(|| format!("Failed to connect to Neo4j at {uri}"))?;
        Ok(Self::new(graph, index_name))
    }

    /// Initialize schema: uniqueness constraints and the chunk vector index
    pub async fn init_schema(&self, dimensions: usize) -> Result<()> {
        let statements = [
            "CREATE CONSTRAINT document_id IF NOT EXISTS FOR (d:Document) REQUIRE d.doc_id IS UNIQUE".to_string(),
            "CREATE CONSTRAINT chunk_id IF NOT EXISTS FOR (c:Chunk) REQUIRE c.chunk_id IS UNIQUE".to_string(),
            "CREATE CONSTRAINT entity_id IF NOT EXISTS FOR (e:Entity) REQUIRE e.id IS UNIQUE".to_string(),
            format!(
                "CREATE VECTOR INDEX `{}` IF NOT EXISTS FOR (c:Chunk) ON (c.embedding) \
                 OPTIONS {{indexConfig: {{`vector.dimensions`: {}, `vector.similarity_function`: 'cosine'}}}}",
                self.index_name, dimensions
            ),
        ];

        for statement in statements {
            self.graph
                .run(Query::new(statement.clone()))
                .await
                .with_context(|| format!("Failed to initialize schema: {statement}"))?;
        }

        info!(index = %self.index_name, dimensions, "Neo4j schema initialized");
        Ok(())
    }

    async fn count_by(&self, cypher: &str) -> Result<BTreeMap<String, usize>> {
        let mut result = self.graph.execute(Query::new(cypher.to_string())).await?;
        let mut counts = BTreeMap::new();
        while let Some(row) = result.next().await? {
            let key: String = row.get("key").context("Missing key")?;
            let count: i64 = row.get("count").unwrap_or(0);
            counts.insert(key, count as usize);
        }
        Ok(counts)
    }

    async fn count(&self, cypher: &str) -> Result<usize> {
        let mut result = self.graph.execute(Query::new(cypher.to_string())).await?;
        let count = if let Some(row) = result.next().await? {
            row.get::<i64>("count").unwrap_or(0) as usize
        } else {
            0
        };
        Ok(count)
    }
}

fn bolt_properties(properties: &Properties) -> HashMap<String, String> {
    properties
        .iter()
        .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn from_bolt_properties(properties: HashMap<String, String>) -> Properties {
    properties
        .into_iter()
        .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
        .collect()
}

fn document_query(doc: &ProcessedDocument) -> Query {
    let metadata: HashMap<String, String> = doc.metadata.clone().into_iter().collect();
    Query::new(
        r#"
        MERGE (d:Document {doc_id: $doc_id})
        SET d.filename = $filename,
            d.format = $format,
            d += $metadata
        "#
        .to_string(),
    )
    .param("doc_id", doc.doc_id.clone())
    .param("filename", doc.filename.clone())
    .param("format", format!("{:?}", doc.format))
    .param("metadata", metadata)
}

fn chunk_query(chunk: &Chunk) -> Query {
    Query::new(
        r#"
        MATCH (d:Document {doc_id: $doc_id})
        MERGE (c:Chunk {chunk_id: $chunk_id})
        SET c.doc_id = $doc_id,
            c.chunk_index = $chunk_index,
            c.text = $text,
            c.chunk_size = $chunk_size,
            c.chunk_overlap = $chunk_overlap
        MERGE (d)-[:HAS_CHUNK]->(c)
        "#
        .to_string(),
    )
    .param("doc_id", chunk.doc_id.clone())
    .param("chunk_id", chunk.chunk_id.clone())
    .param("chunk_index", chunk.index as i64)
    .param("text", chunk.text.clone())
    .param("chunk_size", chunk.chunk_size as i64)
    .param("chunk_overlap", chunk.chunk_overlap as i64)
}

fn embedding_query(chunk: &Chunk, model: &str, embedding: &[f32]) -> Query {
    let vector: Vec<f64> = embedding.iter().map(|&x| x as f64).collect();
    Query::new(
        "MATCH (c:Chunk {chunk_id: $chunk_id}) SET c.embedding = $embedding, c.embeddings_model = $model"
            .to_string(),
    )
    .param("chunk_id", chunk.chunk_id.clone())
    .param("embedding", vector)
    .param("model", model.to_string())
}

/// Merge an entity whose type is written once, on creation. Labels and
/// properties are only applied when the stored type matches; the stored
/// type is returned either way.
fn node_query(node: &CanonicalNode) -> Query {
    Query::new(format!(
        r#"
        MERGE (e:Entity {{id: $id}})
        ON CREATE SET e.type = $type
        WITH e, e.type AS stored
        FOREACH (_ IN CASE WHEN stored = $type THEN [1] ELSE [] END |
            SET e:`{}`, e += $properties)
        RETURN stored AS type
        "#,
        sanitize_identifier(&node.node_type)
    ))
    .param("id", node.id.clone())
    .param("type", node.node_type.clone())
    .param("properties", bolt_properties(&node.properties))
}

fn ensure_same_type(node: &CanonicalNode, stored: String) -> Result<(), MergeConflictError> {
    if stored == node.node_type {
        Ok(())
    } else {
        Err(MergeConflictError {
            id: node.id.clone(),
            existing: stored,
            incoming: node.node_type.clone(),
        })
    }
}

fn clear_chunks_query(doc: &ProcessedDocument) -> Query {
    Query::new("MATCH (c:Chunk {doc_id: $doc_id}) DETACH DELETE c".to_string())
        .param("doc_id", doc.doc_id.clone())
}

fn relationship_query(rel: &CanonicalRelationship) -> Query {
    Query::new(format!(
        r#"
        MATCH (s:Entity {{id: $source}})
        MATCH (t:Entity {{id: $target}})
        MERGE (s)-[r:`{}`]->(t)
        SET r += $properties
        "#,
        sanitize_identifier(&rel.rel_type)
    ))
    .param("source", rel.source.clone())
    .param("target", rel.target.clone())
    .param("properties", bolt_properties(&rel.properties))
}

fn mention_query(chunk: &Chunk, node: &CanonicalNode) -> Query {
    Query::new(
        r#"
        MATCH (c:Chunk {chunk_id: $chunk_id})
        MATCH (e:Entity {id: $id})
        MERGE (c)-[:MENTIONS]->(e)
        "#
        .to_string(),
    )
    .param("chunk_id", chunk.chunk_id.clone())
    .param("id", node.id.clone())
}

fn row_to_chunk(row: &neo4rs::Row) -> Result<Chunk> {
    let embedding: Option<Vec<f64>> = row.get("embedding").ok();
    Ok(Chunk {
        doc_id: row.get("doc_id").context("Missing doc_id")?,
        chunk_id: row.get("chunk_id").context("Missing chunk_id")?,
        index: row.get::<i64>("chunk_index").context("Missing chunk_index")? as usize,
        text: row.get("text").context("Missing text")?,
        chunk_size: row.get::<i64>("chunk_size").unwrap_or(0) as usize,
        chunk_overlap: row.get::<i64>("chunk_overlap").unwrap_or(0) as usize,
        embeddings_model: row.get("embeddings_model").ok(),
        embedding: embedding.map(|v| v.into_iter().map(|x| x as f32).collect()),
        nodes: Vec::new(),
        relationships: Vec::new(),
    })
}

const CHUNK_COLUMNS: &str = "c.doc_id AS doc_id, c.chunk_id AS chunk_id, c.chunk_index AS chunk_index, \
     c.text AS text, c.chunk_size AS chunk_size, c.chunk_overlap AS chunk_overlap, \
     c.embeddings_model AS embeddings_model, c.embedding AS embedding";

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn store_document(&self, doc: &ProcessedDocument, graph: &GraphDocument) -> Result<()> {
        let mut queries = vec![document_query(doc), clear_chunks_query(doc)];
        for chunk in &doc.chunks {
            queries.push(chunk_query(chunk));
            if let (Some(model), Some(embedding)) = (&chunk.embeddings_model, &chunk.embedding) {
                queries.push(embedding_query(chunk, model, embedding));
            }
        }

        let mut links: Vec<Query> = graph.relationships.iter().map(relationship_query).collect();
        for chunk in &doc.chunks {
            links.extend(chunk.nodes.iter().map(|node| mention_query(chunk, node)));
        }
        let statements = queries.len() + graph.nodes.len() + links.len();

        // Dropping an uncommitted transaction rolls it back
        let mut txn = self.graph.start_txn().await.context("Failed to start transaction")?;
        txn.run_queries(queries)
            .await
            .with_context(|| format!("Failed to write document {}", doc.filename))?;

        for node in &graph.nodes {
            let mut result = txn
                .execute(node_query(node))
                .await
                .with_context(|| format!("Failed to write entity {}", node.id))?;
            let stored: String = match result.next(txn.handle()).await? {
                Some(row) => row.get("type").context("Missing type")?,
                None => anyhow::bail!("No row returned for entity {}", node.id),
            };
            ensure_same_type(node, stored)
                .with_context(|| format!("Failed to store graph of document {}", doc.filename))?;
        }

        txn.run_queries(links)
            .await
            .with_context(|| format!("Failed to link document {}", doc.filename))?;
        txn.commit().await.context("Failed to commit document")?;

        debug!(
            doc_id = %doc.doc_id,
            statements,
            nodes = graph.nodes.len(),
            relationships = graph.relationships.len(),
            "Stored document in Neo4j"
        );
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats> {
        Ok(GraphStats {
            documents: self.count("MATCH (d:Document) RETURN count(d) AS count").await?,
            chunks: self.count("MATCH (c:Chunk) RETURN count(c) AS count").await?,
            labels: self
                .count_by("MATCH (e:Entity) RETURN e.type AS key, count(e) AS count")
                .await?,
            relationship_types: self
                .count_by("MATCH (:Entity)-[r]->(:Entity) RETURN type(r) AS key, count(r) AS count")
                .await?,
        })
    }

    fn index_name(&self) -> &str {
        &self.index_name
    }

    async fn similar_chunks(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let vector: Vec<f64> = embedding.iter().map(|&x| x as f64).collect();
        let query = Query::new(format!(
            "CALL db.index.vector.queryNodes($index, $k, $embedding) YIELD node AS c, score \
             RETURN {CHUNK_COLUMNS}, score ORDER BY score DESC"
        ))
        .param("index", self.index_name.clone())
        .param("k", top_k as i64)
        .param("embedding", vector);

        let mut result = self.graph.execute(query).await.context("Vector search failed")?;
        let mut hits = Vec::new();
        while let Some(row) = result.next().await? {
            let score: f64 = row.get("score").context("Missing score")?;
            hits.push(ScoredChunk {
                chunk: row_to_chunk(&row)?,
                score: score as f32,
            });
        }
        Ok(hits)
    }

    async fn export_graph(&self) -> Result<GraphDocument> {
        let mut graph = GraphDocument::default();

        let query = Query::new(
            "MATCH (e:Entity) RETURN e.id AS id, e.type AS type, properties(e) AS properties ORDER BY e.id"
                .to_string(),
        );
        let mut result = self.graph.execute(query).await.context("Failed to export entities")?;
        while let Some(row) = result.next().await? {
            graph.nodes.push(CanonicalNode {
                id: row.get("id").context("Missing id")?,
                node_type: row.get("type").context("Missing type")?,
                properties: from_bolt_properties(row.get("properties").unwrap_or_default()),
            });
        }

        let query = Query::new(
            r#"
            MATCH (s:Entity)-[r]->(t:Entity)
            RETURN s.id AS source, t.id AS target, type(r) AS type, properties(r) AS properties
            ORDER BY source, target, type
            "#
            .to_string(),
        );
        let mut result = self
            .graph
            .execute(query)
            .await
            .context("Failed to export relationships")?;
        while let Some(row) = result.next().await? {
            graph.relationships.push(CanonicalRelationship {
                source: row.get("source").context("Missing source")?,
                target: row.get("target").context("Missing target")?,
                rel_type: row.get("type").context("Missing type")?,
                properties: row.get::<HashMap<String, String>>("properties")
                    .unwrap_or_default()
                    .into_iter()
                    .collect(),
            });
        }

        info!(
            nodes = graph.nodes.len(),
            relationships = graph.relationships.len(),
            "Exported graph from Neo4j"
        );
        Ok(graph)
    }

    async fn chunks_for_entities(&self, entity_ids: &[String]) -> Result<Vec<Chunk>> {
        let query = Query::new(format!(
            "MATCH (c:Chunk)-[:MENTIONS]->(e:Entity) WHERE e.id IN $ids \
             WITH DISTINCT c RETURN {CHUNK_COLUMNS} ORDER BY doc_id, chunk_index"
        ))
        .param("ids", entity_ids.to_vec());

        let mut result = self.graph.execute(query).await.context("Failed to fetch chunks")?;
        let mut chunks = Vec::new();
        while let Some(row) = result.next().await? {
            chunks.push(row_to_chunk(&row)?);
        }
        Ok(chunks)
    }

    async fn write_communities(
        &self,
        community_type: &str,
        assignments: &HashMap<String, usize>,
    ) -> Result<()> {
        let key = sanitize_identifier(community_type);
        let queries: Vec<Query> = assignments
            .iter()
            .map(|(entity_id, community)| {
                Query::new(format!(
                    "MATCH (e:Entity {{id: $id}}) SET e.`{key}` = $community"
                ))
                .param("id", entity_id.clone())
                .param("community", community.to_string())
            })
            .collect();

        let mut txn = self.graph.start_txn().await.context("Failed to start transaction")?;
        txn.run_queries(queries)
            .await
            .context("Failed to write community assignments")?;
        txn.commit().await.context("Failed to commit community assignments")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_keys_never_reach_the_store() {
        let props: Properties = [("id", "x"), ("type", "y"), ("name", "Rome")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let bolt = bolt_properties(&props);
        assert_eq!(bolt.len(), 1);
        assert_eq!(bolt["name"], "Rome");
    }

    #[test]
    fn test_stored_type_mismatch_is_a_conflict() {
        let node = CanonicalNode {
            id: "Jordan".to_string(),
            node_type: "Country".to_string(),
            properties: Properties::new(),
        };

        assert!(ensure_same_type(&node, "Country".to_string()).is_ok());
        let err = ensure_same_type(&node, "Person".to_string()).unwrap_err();
        assert_eq!(err.existing, "Person");
        assert_eq!(err.incoming, "Country");
    }
}
