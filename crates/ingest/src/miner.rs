use extract::{
    Canonicalizer, ExtractionError, GraphDocument, GraphExtractor, MergeConflictError, Ontology,
};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::document::ProcessedDocument;

#[derive(Debug, Clone, Copy)]
pub struct MinerConfig {
    pub max_concurrent_extractions: usize,
    pub request_timeout: Duration,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_extractions: 5,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// What happened to one chunk during mining.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkOutcome {
    Mined { nodes: usize, relationships: usize },
    /// Extraction failed or timed out; the chunk has no graph.
    Failed { error: String },
    /// The extracted graph contradicts itself; the chunk has no graph.
    Conflict { error: MergeConflictError },
}

impl ChunkOutcome {
    pub fn is_mined(&self) -> bool {
        matches!(self, Self::Mined { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MiningReport {
    pub doc_id: String,
    /// One entry per chunk, in chunk order
    pub outcomes: Vec<ChunkOutcome>,
}

impl MiningReport {
    pub fn mined(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_mined()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ChunkOutcome::Failed { .. }))
            .count()
    }

    pub fn conflicts(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ChunkOutcome::Conflict { .. }))
            .count()
    }
}

enum ChunkFailure {
    Extraction(ExtractionError),
    Conflict(MergeConflictError),
}

/// Mines graphs from the chunks of processed documents.
///
/// Chunks are extracted concurrently up to `max_concurrent_extractions`;
/// results are attached by chunk index, never by completion order. A chunk
/// whose extraction fails keeps an empty graph and never affects its
/// siblings.
pub struct GraphMiner {
    extractor: Arc<dyn GraphExtractor>,
    ontology: Option<Arc<Ontology>>,
    canonicalizer: Canonicalizer,
    config: MinerConfig,
}

impl GraphMiner {
    pub fn new(extractor: Arc<dyn GraphExtractor>, ontology: Option<Ontology>) -> Self {
        Self {
            extractor,
            ontology: ontology.map(Arc::new),
            canonicalizer: Canonicalizer::default(),
            config: MinerConfig::default(),
        }
    }

    pub fn with_canonicalizer(mut self, canonicalizer: Canonicalizer) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }

    pub fn with_config(mut self, config: MinerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ontology(&self) -> Option<&Ontology> {
        self.ontology.as_deref()
    }

    /// Mine every chunk of `doc` in place.
    pub async fn mine(&self, doc: &mut ProcessedDocument) -> MiningReport {
        let limit = self.config.max_concurrent_extractions.max(1);

        let texts: Vec<String> = doc.chunks.iter().map(|c| c.text.clone()).collect();
        let mut results: Vec<(usize, Result<GraphDocument, ChunkFailure>)> =
            stream::iter(texts.into_iter().enumerate())
                .map(|(idx, text)| async move { (idx, self.mine_chunk(&text).await) })
                .buffer_unordered(limit)
                .collect()
                .await;
        results.sort_by_key(|(idx, _)| *idx);

        let mut outcomes = Vec::with_capacity(results.len());
        for (idx, result) in results {
            let chunk = &mut doc.chunks[idx];
            let outcome = match result {
                Ok(graph) => {
                    let outcome = ChunkOutcome::Mined {
                        nodes: graph.nodes.len(),
                        relationships: graph.relationships.len(),
                    };
                    chunk.set_graph(graph);
                    outcome
                }
                Err(ChunkFailure::Extraction(e)) => {
                    warn!(doc_id = %doc.doc_id, chunk_index = idx, error = %e, "Error while mining graph");
                    chunk.clear_graph();
                    ChunkOutcome::Failed {
                        error: e.to_string(),
                    }
                }
                Err(ChunkFailure::Conflict(e)) => {
                    warn!(doc_id = %doc.doc_id, chunk_index = idx, error = %e, "Extracted graph has conflicting node types");
                    chunk.clear_graph();
                    ChunkOutcome::Conflict { error: e }
                }
            };
            outcomes.push(outcome);
        }

        let report = MiningReport {
            doc_id: doc.doc_id.clone(),
            outcomes,
        };
        info!(
            doc_id = %report.doc_id,
            chunks = report.outcomes.len(),
            mined = report.mined(),
            failed = report.failed(),
            conflicts = report.conflicts(),
            "Mined graph from document chunks"
        );
        report
    }

    pub async fn mine_document(
        &self,
        mut doc: ProcessedDocument,
    ) -> (ProcessedDocument, MiningReport) {
        let report = self.mine(&mut doc).await;
        (doc, report)
    }

    pub async fn mine_documents(
        &self,
        docs: Vec<ProcessedDocument>,
    ) -> Vec<(ProcessedDocument, MiningReport)> {
        let mut mined = Vec::with_capacity(docs.len());
        for doc in docs {
            mined.push(self.mine_document(doc).await);
        }
        mined
    }

    async fn mine_chunk(&self, text: &str) -> Result<GraphDocument, ChunkFailure> {
        let ontology = self.ontology.as_deref();

        let raw = match timeout(
            self.config.request_timeout,
            self.extractor.extract(text, ontology),
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(ChunkFailure::Extraction(e)),
            Err(_) => {
                return Err(ChunkFailure::Extraction(ExtractionError::Timeout(
                    self.config.request_timeout,
                )));
            }
        };

        self.canonicalizer
            .map(&raw, ontology, text)
            .map_err(ChunkFailure::Conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::document::DocumentFormat;
    use async_trait::async_trait;
    use extract::{MappingOptions, RawGraph, RawNode, RawRelationship};

    /// Stub keyed on chunk text.
    struct ScriptedExtractor;

    fn node(id: &str, node_type: &str) -> RawNode {
        RawNode {
            id: id.to_string(),
            node_type: node_type.to_string(),
            properties: None,
        }
    }

    #[async_trait]
    impl GraphExtractor for ScriptedExtractor {
        async fn extract(&self, text: &str, _o: Option<&Ontology>) -> Result<RawGraph, ExtractionError> {
            match text {
                "fail" => Err(ExtractionError::Provider("provider unavailable".to_string())),
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(RawGraph::default())
                }
                "conflict" => Ok(RawGraph {
                    nodes: vec![node("Jordan", "Person"), node("jordan", "Country")],
                    relationships: vec![],
                }),
                "Marco Rossi lives in Rome." => Ok(RawGraph {
                    nodes: vec![node("marco rossi", "person"), node("Rome", "City"), node("Earth", "Planet")],
                    relationships: vec![RawRelationship {
                        source: "marco rossi".to_string(),
                        target: "Rome".to_string(),
                        rel_type: "LIVES_IN".to_string(),
                        properties: None,
                    }],
                }),
                other => {
                    if let Some(delay) = other.strip_prefix("delay ") {
                        let ms: u64 = delay.parse().unwrap();
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                    }
                    Ok(RawGraph {
                        nodes: vec![node(other, "Text")],
                        relationships: vec![],
                    })
                }
            }
        }
    }

    fn document(texts: &[&str]) -> ProcessedDocument {
        let mut doc = ProcessedDocument::new("doc.txt", DocumentFormat::PlainText, texts.join(" "));
        doc.chunks = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk::new(doc.doc_id.clone(), i, t.to_string(), 100, 0))
            .collect();
        doc
    }

    fn miner() -> GraphMiner {
        GraphMiner::new(Arc::new(ScriptedExtractor), None)
    }

    #[tokio::test]
    async fn test_failed_chunk_is_isolated() {
        let mut doc = document(&["first", "fail", "third", "fourth"]);

        let report = miner().mine(&mut doc).await;

        assert_eq!(doc.chunks.len(), 4);
        assert_eq!(report.outcomes.len(), 4);
        for (i, chunk) in doc.chunks.iter().enumerate() {
            if i == 1 {
                assert!(chunk.nodes.is_empty() && chunk.relationships.is_empty());
                assert!(matches!(report.outcomes[i], ChunkOutcome::Failed { .. }));
            } else {
                assert!(chunk.has_graph());
                assert!(report.outcomes[i].is_mined());
            }
        }
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let miner = miner().with_config(MinerConfig {
            max_concurrent_extractions: 2,
            request_timeout: Duration::from_millis(50),
        });
        let mut doc = document(&["slow", "fast"]);

        let report = miner.mine(&mut doc).await;

        assert!(matches!(&report.outcomes[0], ChunkOutcome::Failed { error } if error.contains("timed out")));
        assert!(report.outcomes[1].is_mined());
        assert!(!doc.chunks[0].has_graph());
    }

    #[tokio::test]
    async fn test_results_attach_by_chunk_index() {
        let miner = miner().with_config(MinerConfig {
            max_concurrent_extractions: 4,
            request_timeout: Duration::from_secs(5),
        });
        let mut doc = document(&["delay 120", "delay 60", "delay 1", "delay 30"]);

        miner.mine(&mut doc).await;

        for chunk in &doc.chunks {
            assert_eq!(chunk.nodes[0].id, extract::Canonicalizer::default().canonical_id(&chunk.text));
        }
    }

    #[tokio::test]
    async fn test_conflicting_chunk_is_surfaced() {
        let mut doc = document(&["conflict", "ok"]);

        let report = miner().mine(&mut doc).await;

        match &report.outcomes[0] {
            ChunkOutcome::Conflict { error } => assert_eq!(error.id, "Jordan"),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(!doc.chunks[0].has_graph());
        assert_eq!(report.conflicts(), 1);
    }

    #[tokio::test]
    async fn test_marco_rossi_end_to_end() {
        let ontology = Ontology::new(["Person", "City"], ["LIVES_IN"]);
        let miner = GraphMiner::new(Arc::new(ScriptedExtractor), Some(ontology))
            .with_canonicalizer(Canonicalizer::new(MappingOptions {
                enforce_ontology: true,
            }));

        let (doc, report) = miner
            .mine_document(document(&["Marco Rossi lives in Rome."]))
            .await;

        assert!(report.outcomes[0].is_mined());
        let chunk = &doc.chunks[0];
        let nodes: Vec<(&str, &str)> = chunk
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.node_type.as_str()))
            .collect();
        assert_eq!(nodes, vec![("Marco Rossi", "Person"), ("Rome", "City")]);
        assert_eq!(chunk.relationships.len(), 1);
        assert_eq!(chunk.relationships[0].source, "Marco Rossi");
        assert_eq!(chunk.relationships[0].target, "Rome");
        assert_eq!(chunk.relationships[0].rel_type, "LIVES_IN");
    }

    #[tokio::test]
    async fn test_mine_runs_on_spawned_task() {
        let miner = Arc::new(miner());
        let mut doc = document(&["one", "fail"]);

        let handle = tokio::spawn({
            let miner = Arc::clone(&miner);
            async move {
                let report = miner.mine(&mut doc).await;
                (doc, report)
            }
        });
        let (doc, report) = handle.await.unwrap();

        assert!(doc.chunks[0].has_graph());
        assert_eq!(report.mined(), 1);
        assert_eq!(report.failed(), 1);

        let docs = vec![document(&["two"])];
        let mined = tokio::spawn(async move { miner.mine_documents(docs).await })
            .await
            .unwrap();
        assert_eq!(mined[0].1.mined(), 1);
    }

    #[tokio::test]
    async fn test_mine_documents_keeps_order() {
        let docs = vec![document(&["one"]), document(&["fail"])];

        let mined = miner().mine_documents(docs).await;

        assert_eq!(mined.len(), 2);
        assert_eq!(mined[0].1.mined(), 1);
        assert_eq!(mined[1].1.failed(), 1);
    }
}
