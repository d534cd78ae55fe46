use extract::GraphDocument;
use petgraph::graph::{NodeIndex, UnGraph};
use serde_json::{json, Map};
use std::collections::{BTreeMap, HashMap};

use crate::model::{Community, TableRow};

/// Entity graph reduced to what community detection needs.
#[derive(Debug, Clone, Default)]
pub struct GraphData {
    pub entities: Vec<String>,
    pub edges: Vec<(usize, usize)>, // (source_idx, target_idx)
    pub entity_to_idx: HashMap<String, usize>,
}

impl GraphData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entities are indexed in id order so detection does not depend on
    /// storage order.
    pub fn from_document(graph: &GraphDocument) -> Self {
        let mut ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        ids.sort_unstable();

        let mut data = Self::new();
        for id in ids {
            data.add_entity(id.to_string());
        }
        for rel in &graph.relationships {
            if let (Some(&s), Some(&t)) = (
                data.entity_to_idx.get(&rel.source),
                data.entity_to_idx.get(&rel.target),
            ) {
                data.add_edge(s, t);
            }
        }
        data
    }

    pub fn add_entity(&mut self, entity_id: String) -> usize {
        if let Some(&idx) = self.entity_to_idx.get(&entity_id) {
            return idx;
        }

        let idx = self.entities.len();
        self.entities.push(entity_id.clone());
        self.entity_to_idx.insert(entity_id, idx);
        idx
    }

    pub fn add_edge(&mut self, source: usize, target: usize) {
        self.edges.push((source, target));
    }

    /// Undirected weighted view; node `i` is entity `i`. Parallel edges in
    /// either direction add up.
    pub fn to_ungraph(&self) -> UnGraph<String, f64> {
        let mut graph = UnGraph::with_capacity(self.entities.len(), self.edges.len());
        for entity in &self.entities {
            graph.add_node(entity.clone());
        }
        for &(s, t) in &self.edges {
            let (a, b) = (NodeIndex::new(s), NodeIndex::new(t));
            match graph.find_edge(a, b) {
                Some(edge) => graph[edge] += 1.0,
                None => {
                    graph.add_edge(a, b, 1.0);
                }
            }
        }
        graph
    }
}

/// Group a graph's entities by their assigned community. Communities come
/// out in id order, members in entity id order; entities without an
/// assignment are skipped.
pub fn collect_communities(
    community_type: &str,
    graph: &GraphDocument,
    assignments: &HashMap<String, usize>,
) -> Vec<Community> {
    let mut members: BTreeMap<usize, Vec<&extract::CanonicalNode>> = BTreeMap::new();
    for node in &graph.nodes {
        if let Some(&community) = assignments.get(&node.id) {
            members.entry(community).or_default().push(node);
        }
    }

    members
        .into_iter()
        .map(|(community_id, mut nodes)| {
            nodes.sort_by(|a, b| a.id.cmp(&b.id));

            let relationships: Vec<_> = graph
                .relationships
                .iter()
                .filter(|r| {
                    assignments.get(&r.source) == Some(&community_id)
                        && assignments.get(&r.target) == Some(&community_id)
                })
                .collect();

            let mut node_types: BTreeMap<&str, usize> = BTreeMap::new();
            for node in &nodes {
                *node_types.entry(node.node_type.as_str()).or_default() += 1;
            }

            let mut community = Community {
                community_type: community_type.to_string(),
                community_id,
                community_size: nodes.len(),
                entity_ids: nodes.iter().map(|n| n.id.clone()).collect(),
                entity_names: nodes
                    .iter()
                    .map(|n| n.properties.get("name").unwrap_or(&n.id).clone())
                    .collect(),
                relationship_ids: relationships.iter().map(|r| r.relationship_id()).collect(),
                relationship_types: relationships.iter().map(|r| r.rel_type.clone()).collect(),
                attributes: Map::new(),
                chunks: Vec::new(),
                table_repr: Some(
                    relationships
                        .iter()
                        .map(|r| TableRow {
                            source: r.source.clone(),
                            relationship: r.rel_type.clone(),
                            target: r.target.clone(),
                        })
                        .collect(),
                ),
            };
            community
                .attributes
                .insert("node_types".to_string(), json!(node_types));
            community
                .attributes
                .insert("density".to_string(), json!(community.density()));
            community
        })
        .collect()
}
