//! Community detection over the stored entity graph and community reports.

pub mod graph_export;
pub mod louvain;
pub mod model;
pub mod summarizer;

pub use graph_export::{collect_communities, GraphData};
pub use louvain::LouvainDetector;
pub use model::{sort_reports, Community, CommunityReport, TableRow};
pub use summarizer::{check_faithfulness, CommunitySummarizer, ReportError, Vocabulary};

use anyhow::Result;
use index::GraphStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of one detection and summarization run.
#[derive(Debug, Serialize)]
pub struct CommunityRun {
    pub run_id: Uuid,
    pub communities: Vec<Community>,
    /// Sorted by rank, highest first
    pub reports: Vec<CommunityReport>,
    /// Communities whose report could not be produced
    pub failures: Vec<ReportFailure>,
}

#[derive(Debug, Serialize)]
pub struct ReportFailure {
    pub community_id: usize,
    pub error: String,
}

pub struct CommunityDetector {
    store: Arc<dyn GraphStore>,
    summarizer: CommunitySummarizer,
}

impl CommunityDetector {
    pub fn new(store: Arc<dyn GraphStore>, summarizer: CommunitySummarizer) -> Self {
        Self { store, summarizer }
    }

    /// Full pipeline: detect communities and generate summaries
    pub async fn detect_and_summarize(&self) -> Result<CommunityRun> {
        let graph = self.store.export_graph().await?;
        let summarizer = self.summarizer.for_run(
            graph
                .nodes
                .iter()
                .map(|n| n.properties.get("name").unwrap_or(&n.id).clone()),
        );
        let run_id = summarizer.run_id();

        if graph.nodes.is_empty() {
            info!(%run_id, "No entities found in graph");
            return Ok(CommunityRun {
                run_id,
                communities: Vec::new(),
                reports: Vec::new(),
                failures: Vec::new(),
            });
        }

        let detector = LouvainDetector::new(GraphData::from_document(&graph));
        let assignments = detector.detect_communities();

        self.store
            .write_communities(LouvainDetector::NAME, &assignments)
            .await?;

        let mut communities = collect_communities(LouvainDetector::NAME, &graph, &assignments);
        for community in &mut communities {
            community.chunks = self.store.chunks_for_entities(&community.entity_ids).await?;
        }

        info!(%run_id, communities = communities.len(), "Generating community summaries");

        let mut reports = Vec::new();
        let mut failures = Vec::new();
        for community in &communities {
            match summarizer.summarize(community).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(community_id = community.community_id, error = %e, "Skipping community report");
                    failures.push(ReportFailure {
                        community_id: community.community_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        sort_reports(&mut reports);

        info!(
            %run_id,
            reports = reports.len(),
            failures = failures.len(),
            "Community run finished"
        );
        Ok(CommunityRun {
            run_id,
            communities,
            reports,
            failures,
        })
    }
}
