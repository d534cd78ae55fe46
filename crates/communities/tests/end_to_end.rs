use async_trait::async_trait;
use communities::{CommunityDetector, CommunitySummarizer};
use extract::{
    Canonicalizer, ExtractionError, GraphExtractor, LanguageModel, MappingOptions, Ontology,
    RawGraph, RawNode, RawRelationship,
};
use index::{GraphStore, Indexer, MemoryStore};
use ingest::{ingest_directory, ChunkerConfig, GraphMiner};
use std::sync::Arc;

struct StubExtractor;

fn node(id: &str, node_type: &str) -> RawNode {
    RawNode {
        id: id.to_string(),
        node_type: node_type.to_string(),
        properties: None,
    }
}

fn rel(source: &str, target: &str, rel_type: &str) -> RawRelationship {
    RawRelationship {
        source: source.to_string(),
        target: target.to_string(),
        rel_type: rel_type.to_string(),
        properties: None,
    }
}

#[async_trait]
impl GraphExtractor for StubExtractor {
    async fn extract(&self, text: &str, _ontology: Option<&Ontology>) -> Result<RawGraph, ExtractionError> {
        if text.contains("Marco") {
            Ok(RawGraph {
                nodes: vec![node("marco rossi", "person"), node("rome", "city"), node("italy", "country")],
                relationships: vec![
                    rel("marco rossi", "rome", "LIVES_IN"),
                    rel("rome", "italy", "LOCATED_IN"),
                    rel("rome", "italy", "UNKNOWN_RELATION"),
                ],
            })
        } else if text.contains("Anna") {
            Ok(RawGraph {
                nodes: vec![node("anna_weber", "Person"), node("Berlin", "City"), node("Spree", "River")],
                relationships: vec![rel("anna_weber", "Berlin", "LIVES_IN")],
            })
        } else {
            Err(ExtractionError::MalformedResponse("no JSON object".to_string()))
        }
    }
}

/// Summarizes a community by naming its first listed entity, or always
/// `mention` when set.
struct EchoModel {
    mention: Option<&'static str>,
}

#[async_trait]
impl LanguageModel for EchoModel {
    async fn generate(&self, _system: &str, prompt: &str, _json: bool) -> anyhow::Result<String> {
        if let Some(name) = self.mention {
            return Ok(format!("This community is about {name}."));
        }
        let first = prompt
            .split("ENTITIES IN THIS COMMUNITY:\n")
            .nth(1)
            .and_then(|rest| rest.lines().next())
            .and_then(|line| line.strip_prefix("- "))
            .unwrap_or_default();
        Ok(format!("This community is about {first}."))
    }

    fn model_name(&self) -> &str {
        "echo"
    }
}

async fn populated_store() -> Arc<MemoryStore> {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "Marco Rossi lives in Rome. Rome is in Italy.").unwrap();
    std::fs::write(dir.path().join("b.md"), "# Berlin\n\nAnna Weber lives in Berlin.").unwrap();
    std::fs::write(dir.path().join("c.txt"), "Nothing to see here.").unwrap();

    let docs = ingest_directory(dir.path(), ChunkerConfig::default()).await.unwrap();
    assert_eq!(docs.len(), 3);

    let ontology = Ontology::new(["Person", "City", "Country"], ["LIVES_IN", "LOCATED_IN"]);
    let miner = GraphMiner::new(Arc::new(StubExtractor), Some(ontology)).with_canonicalizer(
        Canonicalizer::new(MappingOptions {
            enforce_ontology: true,
        }),
    );

    let store = Arc::new(MemoryStore::default());
    let indexer = Indexer::new(store.clone(), None);
    for (mut doc, report) in miner.mine_documents(docs).await {
        if doc.filename.ends_with("c.txt") {
            assert_eq!(report.failed(), 1);
        } else {
            assert_eq!(report.mined(), doc.chunks.len());
        }
        indexer.index_document(&mut doc).await.unwrap();
    }
    store
}

#[tokio::test]
async fn test_documents_to_ranked_community_reports() {
    let store = populated_store().await;

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.documents, 3);
    assert_eq!(stats.labels["Person"], 2);
    assert_eq!(stats.labels["City"], 2);
    assert_eq!(stats.labels["Country"], 1);
    // River is outside the ontology; the UNKNOWN relationship is filtered
    assert!(!stats.labels.contains_key("River"));
    assert_eq!(stats.relationship_count(), 3);

    let summarizer = CommunitySummarizer::new(Arc::new(EchoModel { mention: None }));
    let detector = CommunityDetector::new(store.clone(), summarizer);
    let run = detector.detect_and_summarize().await.unwrap();

    assert_eq!(run.communities.len(), 2);
    assert!(run.failures.is_empty());
    assert_eq!(run.reports.len(), 2);

    // Italy, Marco Rossi, Rome: three members and two relationships
    let top = &run.reports[0];
    assert_eq!(top.community_size, 3);
    assert!((top.rank - 4.0).abs() < 1e-9);
    assert_eq!(top.summary, "This community is about Italy.");
    assert!(run.reports.iter().all(|r| r.run_id == run.run_id));

    let berlin = &run.communities[0];
    assert_eq!(berlin.entity_names, vec!["Anna Weber", "Berlin"]);
    assert_eq!(berlin.chunks.len(), 1);
    assert!(berlin.chunks[0].text.contains("Anna Weber"));

    let graph = store.export_graph().await.unwrap();
    let rome = graph.node("Rome").unwrap();
    assert_eq!(rome.properties["louvain"], "1");
}

#[tokio::test]
async fn test_unfaithful_reports_do_not_stop_the_run() {
    let store = populated_store().await;

    let summarizer = CommunitySummarizer::new(Arc::new(EchoModel { mention: Some("Berlin") }));
    let run = CommunityDetector::new(store, summarizer)
        .detect_and_summarize()
        .await
        .unwrap();

    assert_eq!(run.reports.len(), 1);
    assert_eq!(run.reports[0].community_id, 0);
    assert_eq!(run.failures.len(), 1);
    assert_eq!(run.failures[0].community_id, 1);
    assert!(run.failures[0].error.contains("Berlin"));
}

#[tokio::test]
async fn test_empty_store_yields_empty_run() {
    let summarizer = CommunitySummarizer::new(Arc::new(EchoModel { mention: None }));
    let run = CommunityDetector::new(Arc::new(MemoryStore::default()), summarizer)
        .detect_and_summarize()
        .await
        .unwrap();

    assert!(run.communities.is_empty());
    assert!(run.reports.is_empty());
}
