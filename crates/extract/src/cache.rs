use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::error::ExtractionError;
use crate::extractor::GraphExtractor;
use crate::ontology::Ontology;
use crate::schema::RawGraph;

/// Successful extractions keyed by a hash of the ontology and input text.
pub struct ExtractionCache {
    graphs: Arc<DashMap<String, RawGraph>>,
    max_entries: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl ExtractionCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            graphs: Arc::new(DashMap::new()),
            max_entries,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, text: &str, ontology: Option<&Ontology>) -> Option<RawGraph> {
        let key = cache_key(text, ontology);
        let found = self.graphs.get(&key).map(|r| r.value().clone());
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn insert(&self, text: &str, ontology: Option<&Ontology>, graph: RawGraph) {
        if self.max_entries == 0 {
            return;
        }
        if self.graphs.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self.graphs.iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.graphs.remove(&key);
            }
        }
        self.graphs.insert(cache_key(text, ontology), graph);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            graphs_cached: self.graphs.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.graphs.clear();
    }
}

fn cache_key(text: &str, ontology: Option<&Ontology>) -> String {
    let mut hasher = Sha256::new();
    if let Some(ontology) = ontology {
        // serializing a plain struct of strings cannot fail
        hasher.update(serde_json::to_vec(ontology).unwrap_or_default());
    }
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub graphs_cached: usize,
    pub hits: usize,
    pub misses: usize,
}

/// Serves repeated extractions from an `ExtractionCache`. Failures are
/// never cached.
pub struct CachedExtractor<E> {
    inner: E,
    cache: Arc<ExtractionCache>,
}

impl<E: GraphExtractor> CachedExtractor<E> {
    pub fn new(inner: E, cache: Arc<ExtractionCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<E: GraphExtractor> GraphExtractor for CachedExtractor<E> {
    async fn extract(
        &self,
        text: &str,
        ontology: Option<&Ontology>,
    ) -> Result<RawGraph, ExtractionError> {
        if let Some(graph) = self.cache.get(text, ontology) {
            debug!("Extraction served from cache");
            return Ok(graph);
        }

        let graph = self.inner.extract(text, ontology).await?;
        self.cache.insert(text, ontology, graph.clone());
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RawNode;

    struct Counting(AtomicUsize);

    #[async_trait]
    impl GraphExtractor for Counting {
        async fn extract(&self, text: &str, _o: Option<&Ontology>) -> Result<RawGraph, ExtractionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            if text == "boom" {
                return Err(ExtractionError::Provider("down".to_string()));
            }
            Ok(RawGraph {
                nodes: vec![RawNode {
                    id: text.to_string(),
                    node_type: "Thing".to_string(),
                    properties: None,
                }],
                relationships: vec![],
            })
        }
    }

    #[tokio::test]
    async fn test_repeated_text_hits_cache() {
        let cache = Arc::new(ExtractionCache::new(100));
        let extractor = CachedExtractor::new(Counting(AtomicUsize::new(0)), cache.clone());

        extractor.extract("Rome", None).await.unwrap();
        let second = extractor.extract("Rome", None).await.unwrap();

        assert_eq!(second.nodes[0].id, "Rome");
        assert_eq!(extractor.inner.0.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_ontology_is_part_of_key() {
        let cache = Arc::new(ExtractionCache::new(100));
        let extractor = CachedExtractor::new(Counting(AtomicUsize::new(0)), cache);
        let ontology = Ontology::new(["City"], Vec::<String>::new());

        extractor.extract("Rome", None).await.unwrap();
        extractor.extract("Rome", Some(&ontology)).await.unwrap();

        assert_eq!(extractor.inner.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = Arc::new(ExtractionCache::new(100));
        let extractor = CachedExtractor::new(Counting(AtomicUsize::new(0)), cache.clone());

        assert!(extractor.extract("boom", None).await.is_err());
        assert!(extractor.extract("boom", None).await.is_err());

        assert_eq!(extractor.inner.0.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().graphs_cached, 0);
    }

    #[test]
    fn test_eviction_keeps_cache_bounded() {
        let cache = ExtractionCache::new(4);
        for i in 0..10 {
            cache.insert(&format!("text {i}"), None, RawGraph::default());
        }
        assert!(cache.stats().graphs_cached <= 4);
    }
}
