//! Ontology-constrained graph extraction and canonicalization.

pub mod cache;
pub mod error;
pub mod explorer;
pub mod extractor;
pub mod graph;
pub mod llm;
pub mod mapping;
pub mod normalizer;
pub mod ontology;
pub mod prompt;
pub mod retry;
pub mod schema;

pub use cache::{CachedExtractor, CacheStats, ExtractionCache};
pub use error::{ExtractionError, MergeConflictError, OntologyLoadError};
pub use explorer::{sample_context_texts, OntologyExplorer};
pub use extractor::{parse_raw_graph, GraphExtractor, LlmGraphExtractor};
pub use graph::{merge_graphs, AdjacencyEntry, AdjacencyView, GraphDocument};
pub use llm::{LanguageModel, OllamaClient};
pub use mapping::{Canonicalizer, MappingOptions, MappingStats};
pub use normalizer::{normalize_id, AliasTable, EntityResolver, IdentityResolver};
pub use ontology::{Ontology, OntologyFallback};
pub use retry::{RetryPolicy, RetryingExtractor};
pub use schema::{
    CanonicalNode, CanonicalRelationship, Properties, RawGraph, RawNode, RawRelationship,
};
