use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::ExtractionError;
use crate::llm::{strip_code_fence, LanguageModel};
use crate::ontology::Ontology;
use crate::prompt::{build_extraction_prompt, ExtractionPromptVars, SYSTEM_PROMPT};
use crate::schema::RawGraph;

/// Extracts a raw candidate subgraph from one piece of text.
///
/// Implementations return an error instead of a partial graph when the
/// response does not have the expected shape.
#[async_trait]
pub trait GraphExtractor: Send + Sync {
    async fn extract(
        &self,
        text: &str,
        ontology: Option<&Ontology>,
    ) -> Result<RawGraph, ExtractionError>;
}

#[async_trait]
impl<T: GraphExtractor + ?Sized> GraphExtractor for Arc<T> {
    async fn extract(
        &self,
        text: &str,
        ontology: Option<&Ontology>,
    ) -> Result<RawGraph, ExtractionError> {
        (**self).extract(text, ontology).await
    }
}

/// Extractor backed by a language model in JSON output mode.
pub struct LlmGraphExtractor<M> {
    model: M,
}

impl<M: LanguageModel> LlmGraphExtractor<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

#[async_trait]
impl<M: LanguageModel> GraphExtractor for LlmGraphExtractor<M> {
    async fn extract(
        &self,
        text: &str,
        ontology: Option<&Ontology>,
    ) -> Result<RawGraph, ExtractionError> {
        let prompt = build_extraction_prompt(&ExtractionPromptVars::new(ontology, text));

        let response = self
            .model
            .generate(SYSTEM_PROMPT, &prompt, true)
            .await
            .map_err(|e| ExtractionError::provider(format!("{e:#}")))?;

        let graph = parse_raw_graph(&response)?;
        debug!(
            model = self.model.model_name(),
            nodes = graph.nodes.len(),
            relationships = graph.relationships.len(),
            "Extracted raw graph"
        );
        Ok(graph)
    }
}

/// Parse a model response into a `RawGraph`. Anything that is not an object
/// with `nodes` and `relationships` arrays is rejected as a whole.
pub fn parse_raw_graph(response: &str) -> Result<RawGraph, ExtractionError> {
    serde_json::from_str(strip_code_fence(response))
        .map_err(|e| ExtractionError::MalformedResponse(e.to_string()))
}
