use ingest::Chunk;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use uuid::Uuid;

/// One `source, relationship, target` row of a community's table view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub source: String,
    pub relationship: String,
    pub target: String,
}

/// A group of entities found by one detection pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    /// Detection algorithm that produced the community
    pub community_type: String,
    pub community_id: usize,
    pub community_size: usize,
    pub entity_ids: Vec<String>,
    pub entity_names: Vec<String>,
    pub relationship_ids: Vec<String>,
    /// Parallel to `relationship_ids`
    pub relationship_types: Vec<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
    #[serde(default)]
    pub table_repr: Option<Vec<TableRow>>,
}

impl Community {
    /// Relationships per ordered pair of distinct members; 0 for singletons.
    pub fn density(&self) -> f64 {
        if self.community_size < 2 {
            return 0.0;
        }
        let pairs = self.community_size * (self.community_size - 1);
        self.relationship_ids.len() as f64 / pairs as f64
    }

    pub fn rank(&self) -> f64 {
        self.community_size as f64 * (1.0 + self.density())
    }
}

/// Natural-language summary of one community from one generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityReport {
    pub community_type: String,
    pub community_id: usize,
    pub run_id: Uuid,
    pub summary: String,
    /// Higher is more relevant. Only meaningful for ordering.
    pub rank: f64,
    pub community_size: usize,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub summary_embeddings: Option<Vec<f32>>,
}

/// Sort by rank, highest first; ties keep community id order.
pub fn sort_reports(reports: &mut [CommunityReport]) {
    reports.sort_by(|a, b| {
        b.rank
            .partial_cmp(&a.rank)
            .unwrap_or(Ordering::Equal)
            .then(a.community_id.cmp(&b.community_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn community(size: usize, relationships: usize) -> Community {
        Community {
            community_type: "louvain".to_string(),
            community_id: 0,
            community_size: size,
            entity_ids: Vec::new(),
            entity_names: Vec::new(),
            relationship_ids: (0..relationships).map(|i| i.to_string()).collect(),
            relationship_types: Vec::new(),
            attributes: Map::new(),
            chunks: Vec::new(),
            table_repr: None,
        }
    }

    fn report(community_id: usize, rank: f64) -> CommunityReport {
        CommunityReport {
            community_type: "louvain".to_string(),
            community_id,
            run_id: Uuid::nil(),
            summary: String::new(),
            rank,
            community_size: 1,
            attributes: Map::new(),
            summary_embeddings: None,
        }
    }

    #[test]
    fn test_rank_rewards_size_and_density() {
        assert_eq!(community(1, 0).rank(), 1.0);
        assert_eq!(community(3, 0).rank(), 3.0);
        // 3 relationships over 6 ordered pairs
        assert_eq!(community(3, 3).rank(), 4.5);
    }

    #[test]
    fn test_reports_sort_by_rank_descending() {
        let mut reports = vec![report(0, 1.0), report(1, 4.5), report(2, 4.5), report(3, 2.0)];
        sort_reports(&mut reports);

        let order: Vec<usize> = reports.iter().map(|r| r.community_id).collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
    }
}
