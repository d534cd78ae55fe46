mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use communities::{CommunityDetector, CommunityReport, CommunitySummarizer, ReportFailure};
use extract::{
    CacheStats, CachedExtractor, Canonicalizer, ExtractionCache, GraphExtractor, LanguageModel,
    LlmGraphExtractor, MappingOptions, OllamaClient, Ontology, OntologyExplorer, RetryPolicy,
    RetryingExtractor,
};
use index::{EmbeddingClient, GraphStats, GraphStore, Indexer, MemoryStore, Neo4jStore};
use ingest::{GraphMiner, MinerConfig, ProcessedDocument};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::{AppConfig, LogFormat, StoreKind};
use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};

struct AppState {
    config: AppConfig,
    llm: Arc<dyn LanguageModel>,
    miner: GraphMiner,
    indexer: Indexer,
    detector: CommunityDetector,
    cache: Option<Arc<ExtractionCache>>,
    metrics: Arc<Metrics>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    store: String,
}

#[derive(Deserialize)]
struct IngestRequest {
    path: String,
}

#[derive(Debug, Serialize)]
struct DocumentResult {
    doc_id: String,
    filename: String,
    chunks: usize,
    mined: usize,
    failed: usize,
    conflicts: usize,
    nodes: usize,
    relationships: usize,
    /// Set when the document could not be stored
    error: Option<String>,
}

#[derive(Serialize)]
struct IngestResponse {
    documents: Vec<DocumentResult>,
}

#[derive(Deserialize)]
struct DiscoverRequest {
    path: String,
    domain: Option<String>,
    #[serde(default = "default_pct_chunks")]
    pct_chunks: f64,
    #[serde(default = "default_chunks_limit")]
    chunks_limit: usize,
    /// Fixed seed for a reproducible chunk sample
    seed: Option<u64>,
}

fn default_pct_chunks() -> f64 {
    0.2
}

fn default_chunks_limit() -> usize {
    20
}

#[derive(Serialize)]
struct CommunitiesResponse {
    run_id: Uuid,
    communities: usize,
    reports: Vec<CommunityReport>,
    failures: Vec<ReportFailure>,
}

#[derive(Serialize)]
struct MetricsResponse {
    pipeline: MetricsSnapshot,
    cache: Option<CacheStats>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(config.server.log_format);

    let bind_address = config.server.bind_address.clone();
    let state = Arc::new(build_state(config).await?);
    let app = router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;

    info!("Server listening on http://{}", bind_address);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn build_state(config: AppConfig) -> Result<AppState> {
    let ontology = match &config.ontology.path {
        Some(path) => Ontology::load(path, config.ontology.fallback)
            .with_context(|| format!("Failed to load ontology: {:?}", path))?,
        None => None,
    };

    let llm: Arc<dyn LanguageModel> = Arc::new(OllamaClient::new(
        config.llm.base_url.clone(),
        config.llm.model.clone(),
    ));

    let retrying = RetryingExtractor::new(
        LlmGraphExtractor::new(Arc::clone(&llm)),
        RetryPolicy::new(
            config.retry.max_retries,
            config.retry.initial_backoff_ms,
            config.retry.max_backoff_ms,
        ),
    );
    let cache = config
        .cache
        .enabled
        .then(|| Arc::new(ExtractionCache::new(config.cache.max_entries)));
    let extractor: Arc<dyn GraphExtractor> = match &cache {
        Some(cache) => Arc::new(CachedExtractor::new(retrying, Arc::clone(cache))),
        None => Arc::new(retrying),
    };

    let miner = GraphMiner::new(extractor, ontology)
        .with_canonicalizer(Canonicalizer::new(MappingOptions {
            enforce_ontology: config.ontology.enforce,
        }))
        .with_config(MinerConfig {
            max_concurrent_extractions: config.concurrency.max_concurrent_extractions,
            request_timeout: config.concurrency.request_timeout(),
        });

    let embeddings = config.embeddings.enabled.then(|| {
        EmbeddingClient::new(
            config.embeddings.base_url.clone(),
            config.embeddings.model.clone(),
        )
    });

    let store: Arc<dyn GraphStore> = match config.store {
        StoreKind::Neo4j => {
            let store = Neo4jStore::connect(
                &config.neo4j.uri,
                &config.neo4j.user,
                &config.neo4j.password,
                &config.neo4j.vector_index,
            )
            .await?;
            match &embeddings {
                Some(client) => {
                    let dimensions = client
                        .get_dimension()
                        .await
                        .context("Failed to probe embedding dimension")?;
                    store.init_schema(dimensions).await?;
                }
                None => warn!("Embeddings disabled, skipping vector index creation"),
            }
            Arc::new(store)
        }
        StoreKind::Memory => Arc::new(MemoryStore::new(config.neo4j.vector_index.clone())),
    };

    let mut summarizer = CommunitySummarizer::new(Arc::clone(&llm));
    if config.communities.embed_summaries {
        if let Some(client) = &embeddings {
            summarizer = summarizer.with_embeddings(client.clone());
        }
    }

    info!(
        store = ?config.store,
        mode = ?config.mode,
        model = %config.llm.model,
        "Pipeline initialized"
    );

    Ok(AppState {
        indexer: Indexer::new(Arc::clone(&store), embeddings),
        detector: CommunityDetector::new(store, summarizer),
        llm,
        miner,
        cache,
        metrics: Metrics::new(),
        config,
    })
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ingest", post(ingest_documents))
        .route("/ontology/discover", post(discover_ontology))
        .route("/communities", post(build_communities))
        .route("/stats", get(get_stats))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn internal_error(context: &str, e: anyhow::Error) -> StatusCode {
    error!(error = %format!("{e:#}"), "{}", context);
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = match state.indexer.get_stats().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {}", e),
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        store,
    })
}

async fn ingest_documents(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, StatusCode> {
    let result = ingest_path(&state, &req.path).await;
    state.metrics.record_request(result.is_ok());
    result.map(Json)
}

async fn read_documents(state: &AppState, path: &Path) -> Result<Vec<ProcessedDocument>, StatusCode> {
    let chunker = state.config.chunker;
    if path.is_file() {
        Ok(vec![ingest::ingest_file(path, chunker)
            .await
            .map_err(|e| internal_error("Failed to read document", e))?])
    } else if path.is_dir() {
        ingest::ingest_directory(path, chunker)
            .await
            .map_err(|e| internal_error("Failed to read directory", e))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn ingest_path(state: &AppState, path: &str) -> Result<IngestResponse, StatusCode> {
    let timer = TimedOperation::start();
    let docs = read_documents(state, &PathBuf::from(path)).await?;

    let mut documents = Vec::with_capacity(docs.len());
    for (mut doc, report) in state.miner.mine_documents(docs).await {
        state.metrics.record_mining(&report);

        let mut result = DocumentResult {
            doc_id: doc.doc_id.clone(),
            filename: doc.filename.clone(),
            chunks: doc.chunks.len(),
            mined: report.mined(),
            failed: report.failed(),
            conflicts: report.conflicts(),
            nodes: 0,
            relationships: 0,
            error: None,
        };

        match state.indexer.index_document(&mut doc).await {
            Ok(graph) => {
                result.nodes = graph.nodes.len();
                result.relationships = graph.relationships.len();
                state.metrics.record_document(Some((result.nodes, result.relationships)));
            }
            Err(e) => {
                warn!(doc_id = %doc.doc_id, error = %format!("{e:#}"), "Failed to index document");
                state.metrics.record_document(None);
                result.error = Some(format!("{e:#}"));
            }
        }
        documents.push(result);
    }

    state.metrics.record_ingest(timer.elapsed());
    Ok(IngestResponse { documents })
}

async fn discover_ontology(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DiscoverRequest>,
) -> Result<Json<Ontology>, StatusCode> {
    let docs = read_documents(&state, &PathBuf::from(&req.path)).await?;
    let texts: Vec<Vec<&str>> = docs.iter().map(|doc| doc.chunk_texts()).collect();
    let mut rng = match req.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let explorer = OntologyExplorer::new(Arc::clone(&state.llm), req.domain);
    let result = explorer
        .find_suitable_ontology(&texts, req.pct_chunks, req.chunks_limit, &mut rng)
        .await;
    state.metrics.record_request(result.is_ok());

    result.map(Json).map_err(|e| {
        warn!(error = %e, "Ontology discovery failed");
        StatusCode::BAD_GATEWAY
    })
}

async fn build_communities(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CommunitiesResponse>, StatusCode> {
    let timer = TimedOperation::start();
    let run = state
        .detector
        .detect_and_summarize()
        .await
        .map_err(|e| internal_error("Community detection failed", e));
    state.metrics.record_request(run.is_ok());
    let run = run?;

    state
        .metrics
        .record_communities(timer.elapsed(), run.reports.len(), run.failures.len());

    Ok(Json(CommunitiesResponse {
        run_id: run.run_id,
        communities: run.communities.len(),
        reports: run.reports,
        failures: run.failures,
    }))
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<GraphStats>, StatusCode> {
    let stats = state
        .indexer
        .get_stats()
        .await
        .map_err(|e| internal_error("Failed to read store statistics", e))?;

    Ok(Json(stats))
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        pipeline: state.metrics.snapshot(),
        cache: state.cache.as_ref().map(|cache| cache.stats()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use extract::{ExtractionError, RawGraph, RawNode, RawRelationship};
    use serde_json::Value;
    use tower::ServiceExt;

    struct StubExtractor;

    #[async_trait]
    impl GraphExtractor for StubExtractor {
        async fn extract(&self, text: &str, _o: Option<&Ontology>) -> Result<RawGraph, ExtractionError> {
            if !text.contains("Marco") {
                return Err(ExtractionError::Provider("unreachable".to_string()));
            }
            let node = |id: &str, t: &str| RawNode {
                id: id.to_string(),
                node_type: t.to_string(),
                properties: None,
            };
            Ok(RawGraph {
                nodes: vec![node("Marco Rossi", "Person"), node("Rome", "City")],
                relationships: vec![RawRelationship {
                    source: "Marco Rossi".to_string(),
                    target: "Rome".to_string(),
                    rel_type: "LIVES_IN".to_string(),
                    properties: None,
                }],
            })
        }
    }

    struct StubModel;

    #[async_trait]
    impl LanguageModel for StubModel {
        async fn generate(&self, _s: &str, _p: &str, json: bool) -> Result<String> {
            if json {
                return Ok(r#"{"allowed_labels": ["Person", "City"], "allowed_relations": ["LIVES_IN"]}"#.to_string());
            }
            Ok("Marco Rossi lives in Rome.".to_string())
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    fn test_app() -> Router {
        let store: Arc<dyn GraphStore> = Arc::new(MemoryStore::default());
        let cache = Arc::new(ExtractionCache::new(100));
        let extractor = CachedExtractor::new(StubExtractor, cache.clone());
        let llm: Arc<dyn LanguageModel> = Arc::new(StubModel);
        let state = AppState {
            config: AppConfig::default(),
            llm: Arc::clone(&llm),
            miner: GraphMiner::new(Arc::new(extractor), None),
            indexer: Indexer::new(Arc::clone(&store), None),
            detector: CommunityDetector::new(store, CommunitySummarizer::new(llm)),
            cache: Some(cache),
            metrics: Metrics::new(),
        };
        router(Arc::new(state))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(json) => Body::from(json.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_ingest_then_communities() {
        let app = test_app();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Marco Rossi lives in Rome.").unwrap();
        std::fs::write(dir.path().join("b.txt"), "Nothing here.").unwrap();

        let (status, body) = call(
            &app,
            "POST",
            "/ingest",
            Some(serde_json::json!({ "path": dir.path().to_string_lossy() })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let documents = body["documents"].as_array().unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0]["nodes"], 2);
        assert_eq!(documents[0]["mined"], 1);
        assert_eq!(documents[1]["failed"], 1);
        assert!(documents[1]["error"].is_null());

        let (status, stats) = call(&app, "GET", "/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["labels"]["Person"], 1);
        assert_eq!(stats["relationship_types"]["LIVES_IN"], 1);

        let (status, run) = call(&app, "POST", "/communities", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(run["communities"], 1);
        assert_eq!(run["reports"][0]["summary"], "Marco Rossi lives in Rome.");

        let (_, metrics) = call(&app, "GET", "/metrics", None).await;
        assert_eq!(metrics["pipeline"]["chunks_mined"], 1);
        assert_eq!(metrics["pipeline"]["chunks_failed"], 1);
        assert_eq!(metrics["pipeline"]["community_runs"], 1);
        assert_eq!(metrics["cache"]["misses"], 2);
    }

    #[tokio::test]
    async fn test_missing_path_is_not_found() {
        let app = test_app();
        let (status, _) = call(
            &app,
            "POST",
            "/ingest",
            Some(serde_json::json!({ "path": "/definitely/not/here" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, metrics) = call(&app, "GET", "/metrics", None).await;
        assert_eq!(metrics["pipeline"]["failed_requests"], 1);
    }

    #[tokio::test]
    async fn test_discover_ontology() {
        let app = test_app();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Marco Rossi lives in Rome.").unwrap();

        let (status, body) = call(
            &app,
            "POST",
            "/ontology/discover",
            Some(serde_json::json!({ "path": dir.path().to_string_lossy(), "pct_chunks": 1.0, "seed": 7 })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed_labels"], serde_json::json!(["Person", "City"]));
        assert_eq!(body["allowed_relations"], serde_json::json!(["LIVES_IN"]));
    }

    #[tokio::test]
    async fn test_health_reports_store() {
        let (status, body) = call(&test_app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["store"], "ok");
    }
}
