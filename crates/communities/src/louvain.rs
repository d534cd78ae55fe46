use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::graph_export::GraphData;

const MAX_PASSES: usize = 10;
const MAX_LEVELS: usize = 10;

/// Weighted undirected graph at one aggregation level. Each undirected
/// edge is stored in both directions; a self-loop holds the internal weight
/// of an aggregated community.
struct LevelGraph {
    adj: Vec<BTreeMap<usize, f64>>,
}

impl LevelGraph {
    fn len(&self) -> usize {
        self.adj.len()
    }

    fn degree(&self, node: usize) -> f64 {
        self.adj[node].values().sum()
    }

    fn total_weight(&self) -> f64 {
        (0..self.len()).map(|n| self.degree(n)).sum()
    }
}

/// Louvain modularity optimisation.
///
/// Nodes are visited in index order and ties between candidate communities
/// go to the lowest community id, so a given graph always yields the same
/// partition. Community ids are renumbered by first appearance in entity
/// order.
pub struct LouvainDetector {
    graph: GraphData,
}

impl LouvainDetector {
    pub const NAME: &'static str = "louvain";

    pub fn new(graph: GraphData) -> Self {
        Self { graph }
    }

    /// Run Louvain community detection
    /// Returns: entity_id -> community_id
    pub fn detect_communities(&self) -> HashMap<String, usize> {
        let n = self.graph.entities.len();
        if n == 0 {
            return HashMap::new();
        }

        let ungraph = self.graph.to_ungraph();
        let mut adj: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n];
        for edge in ungraph.edge_references() {
            let (s, t) = (edge.source().index(), edge.target().index());
            if s == t {
                // Self-references say nothing about grouping
                continue;
            }
            *adj[s].entry(t).or_insert(0.0) += *edge.weight();
            *adj[t].entry(s).or_insert(0.0) += *edge.weight();
        }

        // membership[i]: community of original entity i
        let mut membership: Vec<usize> = (0..n).collect();
        let mut level = LevelGraph { adj };

        for depth in 0..MAX_LEVELS {
            let (communities, moved) = local_moving(&level);
            if !moved {
                debug!(levels = depth, "Louvain converged");
                break;
            }
            let (renumbered, count) = renumber(&communities);
            for c in membership.iter_mut() {
                *c = renumbered[*c];
            }
            level = aggregate(&level, &renumbered, count);
        }

        let (final_ids, count) = renumber(&membership);
        debug!(entities = n, communities = count, "Detected communities");

        self.graph
            .entities
            .iter()
            .zip(final_ids)
            .map(|(entity, community)| (entity.clone(), community))
            .collect()
    }
}

/// One local-moving phase. Returns each node's community and whether any
/// node changed community.
fn local_moving(graph: &LevelGraph) -> (Vec<usize>, bool) {
    let n = graph.len();
    let mut community: Vec<usize> = (0..n).collect();
    let degrees: Vec<f64> = (0..n).map(|i| graph.degree(i)).collect();
    let mut sigma_tot = degrees.clone();
    let m2 = graph.total_weight();

    if m2 == 0.0 {
        return (community, false);
    }

    let mut moved_any = false;
    for _ in 0..MAX_PASSES {
        let mut moved = false;

        for node in 0..n {
            let current = community[node];
            let k_i = degrees[node];

            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for (&neighbor, &weight) in &graph.adj[node] {
                if neighbor != node {
                    *links.entry(community[neighbor]).or_insert(0.0) += weight;
                }
            }

            // Take the node out of its community before weighing options
            sigma_tot[current] -= k_i;
            let gain = |c: usize, k_i_in: f64| k_i_in - sigma_tot[c] * k_i / m2;

            let mut best = current;
            let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
            for (&candidate, &k_i_in) in &links {
                let g = gain(candidate, k_i_in);
                if g > best_gain + f64::EPSILON {
                    best = candidate;
                    best_gain = g;
                }
            }

            sigma_tot[best] += k_i;
            if best != current {
                community[node] = best;
                moved = true;
                moved_any = true;
            }
        }

        if !moved {
            break;
        }
    }

    (community, moved_any)
}

/// Map community labels to `0..count` by first appearance.
fn renumber(communities: &[usize]) -> (Vec<usize>, usize) {
    let mut mapping: HashMap<usize, usize> = HashMap::new();
    let renumbered = communities
        .iter()
        .map(|c| {
            let next = mapping.len();
            *mapping.entry(*c).or_insert(next)
        })
        .collect();
    (renumbered, mapping.len())
}

/// Collapse each community into a single node.
fn aggregate(graph: &LevelGraph, community: &[usize], count: usize) -> LevelGraph {
    let mut adj: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); count];
    for (node, neighbors) in graph.adj.iter().enumerate() {
        for (&neighbor, &weight) in neighbors {
            *adj[community[node]]
                .entry(community[neighbor])
                .or_insert(0.0) += weight;
        }
    }
    LevelGraph { adj }
}
