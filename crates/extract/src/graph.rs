use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::MergeConflictError;
use crate::schema::{CanonicalNode, CanonicalRelationship, Properties};

/// Canonical subgraph extracted from (or merged across) chunks.
///
/// Node ids are unique and relationships are unique by
/// `(source, target, type)`. Both keep first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub nodes: Vec<CanonicalNode>,
    pub relationships: Vec<CanonicalRelationship>,
    #[serde(default)]
    pub source: String,
}

/// `node_id -> (type, [(successor_id, relationship_type)])`
pub type AdjacencyView = BTreeMap<String, AdjacencyEntry>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjacencyEntry {
    #[serde(rename = "type")]
    pub node_type: String,
    pub relationships: Vec<(String, String)>,
}

impl GraphDocument {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&CanonicalNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Union of `self` and `other`; `other`'s properties override on key
    /// collision.
    pub fn merge(&self, other: &GraphDocument) -> Result<GraphDocument, MergeConflictError> {
        merge_graphs([self, other])
    }

    pub fn adjacency(&self) -> AdjacencyView {
        let mut view: AdjacencyView = self
            .nodes
            .iter()
            .map(|n| {
                (
                    n.id.clone(),
                    AdjacencyEntry {
                        node_type: n.node_type.clone(),
                        relationships: Vec::new(),
                    },
                )
            })
            .collect();

        for rel in &self.relationships {
            if let Some(entry) = view.get_mut(&rel.source) {
                entry
                    .relationships
                    .push((rel.target.clone(), rel.rel_type.clone()));
            }
        }
        view
    }

    /// Rebuild a graph document from its adjacency view. Properties other
    /// than `name` are not part of the view and are lost.
    pub fn from_adjacency(view: &AdjacencyView, source: &str) -> GraphDocument {
        let nodes = view
            .iter()
            .map(|(id, entry)| CanonicalNode {
                id: id.clone(),
                node_type: entry.node_type.clone(),
                properties: Properties::from([("name".to_string(), id.clone())]),
            })
            .collect();

        let relationships = view
            .iter()
            .flat_map(|(id, entry)| {
                entry
                    .relationships
                    .iter()
                    .filter(|(target, _)| view.contains_key(target))
                    .map(move |(target, rel_type)| CanonicalRelationship {
                        source: id.clone(),
                        target: target.clone(),
                        rel_type: rel_type.clone(),
                        properties: Properties::new(),
                    })
            })
            .collect();

        GraphDocument {
            nodes,
            relationships,
            source: source.to_string(),
        }
    }

    /// Directed graph keyed by canonical id: node weights are ids, edge
    /// weights relationship types.
    pub fn to_digraph(&self) -> (DiGraph<String, String>, HashMap<String, NodeIndex>) {
        let mut graph = DiGraph::with_capacity(self.nodes.len(), self.relationships.len());
        let mut index = HashMap::with_capacity(self.nodes.len());

        for node in &self.nodes {
            let idx = graph.add_node(node.id.clone());
            index.insert(node.id.clone(), idx);
        }
        for rel in &self.relationships {
            if let (Some(&s), Some(&t)) = (index.get(&rel.source), index.get(&rel.target)) {
                graph.add_edge(s, t, rel.rel_type.clone());
            }
        }
        (graph, index)
    }
}

/// Merge graph documents in iteration order.
///
/// Node and relationship sets (ids, types) do not depend on the order;
/// property values do, with later documents winning.
pub fn merge_graphs<'a>(
    graphs: impl IntoIterator<Item = &'a GraphDocument>,
) -> Result<GraphDocument, MergeConflictError> {
    let mut builder = GraphBuilder::default();
    let mut sources = Vec::new();

    for graph in graphs {
        for node in &graph.nodes {
            builder.add_node(node.clone())?;
        }
        for rel in &graph.relationships {
            builder.add_relationship(rel.clone());
        }
        if !graph.source.is_empty() {
            sources.push(graph.source.as_str());
        }
    }

    let mut merged = builder.finish();
    merged.source = sources.join("\n\n");
    Ok(merged)
}

/// Accumulates canonical nodes and relationships, merging collisions.
#[derive(Debug, Default)]
pub(crate) struct GraphBuilder {
    nodes: Vec<CanonicalNode>,
    node_index: HashMap<String, usize>,
    relationships: Vec<CanonicalRelationship>,
    rel_index: HashMap<(String, String, String), usize>,
}

impl GraphBuilder {
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.node_index.contains_key(id)
    }

    pub(crate) fn add_node(&mut self, node: CanonicalNode) -> Result<(), MergeConflictError> {
        match self.node_index.get(&node.id) {
            Some(&idx) => {
                let existing = &mut self.nodes[idx];
                if existing.node_type != node.node_type {
                    return Err(MergeConflictError {
                        id: node.id,
                        existing: existing.node_type.clone(),
                        incoming: node.node_type,
                    });
                }
                existing.properties.extend(node.properties);
            }
            None => {
                self.node_index.insert(node.id.clone(), self.nodes.len());
                self.nodes.push(node);
            }
        }
        Ok(())
    }

    /// Relationships whose endpoints are not present are ignored.
    pub(crate) fn add_relationship(&mut self, rel: CanonicalRelationship) -> bool {
        if !self.contains(&rel.source) || !self.contains(&rel.target) {
            return false;
        }

        let key = (rel.source.clone(), rel.target.clone(), rel.rel_type.clone());
        match self.rel_index.get(&key) {
            Some(&idx) => self.relationships[idx].properties.extend(rel.properties),
            None => {
                self.rel_index.insert(key, self.relationships.len());
                self.relationships.push(rel);
            }
        }
        true
    }

    pub(crate) fn finish(self) -> GraphDocument {
        GraphDocument {
            nodes: self.nodes,
            relationships: self.relationships,
            source: String::new(),
        }
    }
}
