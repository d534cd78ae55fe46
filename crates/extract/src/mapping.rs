//! Conversion of raw model output into canonical graph documents.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::MergeConflictError;
use crate::graph::{GraphBuilder, GraphDocument};
use crate::normalizer::{
    capitalize, format_property_key, normalize_id, title_case, EntityResolver, IdentityResolver,
};
use crate::ontology::Ontology;
use crate::schema::{CanonicalNode, CanonicalRelationship, Properties, RawGraph, RawNode};

const UNKNOWN_TOKEN: &str = "unknown";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingOptions {
    /// Drop nodes and relationships whose type falls outside the ontology.
    pub enforce_ontology: bool,
}

/// What the mapping dropped, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingStats {
    pub empty_ids: usize,
    pub dangling_relationships: usize,
    pub unknown_relationships: usize,
    pub off_ontology_nodes: usize,
    pub off_ontology_relationships: usize,
}

/// Maps a `RawGraph` to a `GraphDocument`:
///
/// 1. node ids are normalized (punctuation stripped) and passed through the
///    entity resolver,
/// 2. ids are title-cased, types capitalized, property keys camelCased and a
///    `name` property set to the id,
/// 3. relationship endpoints are resolved by exact raw id within the same
///    raw graph,
/// 4. relationship types containing "unknown" are dropped,
/// 5. colliding ids merge in source order, conflicting types are an error.
#[derive(Clone)]
pub struct Canonicalizer {
    resolver: Arc<dyn EntityResolver>,
    options: MappingOptions,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new(MappingOptions::default())
    }
}

impl Canonicalizer {
    pub fn new(options: MappingOptions) -> Self {
        Self {
            resolver: Arc::new(IdentityResolver),
            options,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn EntityResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn options(&self) -> MappingOptions {
        self.options
    }

    pub fn canonical_id(&self, raw_id: &str) -> String {
        let normalized = normalize_id(raw_id);
        title_case(&self.resolver.resolve(&normalized))
    }

    pub fn canonical_node(&self, node: &RawNode) -> CanonicalNode {
        let id = self.canonical_id(&node.id);
        let mut properties = format_properties(node.properties.as_ref());
        properties.insert("name".to_string(), id.clone());

        CanonicalNode {
            id,
            node_type: capitalize(&node.node_type),
            properties,
        }
    }

    pub fn map(
        &self,
        raw: &RawGraph,
        ontology: Option<&Ontology>,
        source: &str,
    ) -> Result<GraphDocument, MergeConflictError> {
        let (graph, stats) = self.map_with_stats(raw, ontology, source)?;
        if stats != MappingStats::default() {
            debug!(?stats, "Dropped items while mapping extracted graph");
        }
        Ok(graph)
    }

    pub fn map_with_stats(
        &self,
        raw: &RawGraph,
        ontology: Option<&Ontology>,
        source: &str,
    ) -> Result<(GraphDocument, MappingStats), MergeConflictError> {
        let enforce = self.options.enforce_ontology.then_some(ontology).flatten();
        let mut stats = MappingStats::default();
        let mut builder = GraphBuilder::default();

        // raw id -> canonical id, first occurrence wins
        let mut resolved: HashMap<&str, String> = HashMap::with_capacity(raw.nodes.len());

        for raw_node in &raw.nodes {
            let mut node = self.canonical_node(raw_node);
            if node.id.is_empty() {
                stats.empty_ids += 1;
                continue;
            }

            if let Some(ontology) = enforce {
                match ontology.resolve_label(&node.node_type) {
                    Some(label) => node.node_type = label.to_string(),
                    None => {
                        stats.off_ontology_nodes += 1;
                        continue;
                    }
                }
            }

            resolved
                .entry(raw_node.id.as_str())
                .or_insert_with(|| node.id.clone());
            builder.add_node(node)?;
        }

        for raw_rel in &raw.relationships {
            if raw_rel.rel_type.to_lowercase().contains(UNKNOWN_TOKEN) {
                stats.unknown_relationships += 1;
                continue;
            }

            let (Some(source_id), Some(target_id)) = (
                resolved.get(raw_rel.source.as_str()),
                resolved.get(raw_rel.target.as_str()),
            ) else {
                stats.dangling_relationships += 1;
                continue;
            };

            let mut rel_type = raw_rel.rel_type.trim().to_string();
            if let Some(ontology) = enforce {
                match ontology.resolve_relation(&rel_type) {
                    Some(allowed) => rel_type = allowed.to_string(),
                    None => {
                        stats.off_ontology_relationships += 1;
                        continue;
                    }
                }
            }

            builder.add_relationship(CanonicalRelationship {
                source: source_id.clone(),
                target: target_id.clone(),
                rel_type,
                properties: format_properties(raw_rel.properties.as_ref()),
            });
        }

        let mut graph = builder.finish();
        graph.source = source.to_string();
        Ok((graph, stats))
    }
}

fn format_properties(properties: Option<&Properties>) -> Properties {
    properties
        .into_iter()
        .flatten()
        .map(|(k, v)| (format_property_key(k), v.clone()))
        .collect()
}
