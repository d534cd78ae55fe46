use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::error::ExtractionError;
use crate::llm::{strip_code_fence, LanguageModel};
use crate::ontology::Ontology;
use crate::prompt::{build_ontology_prompt, SYSTEM_PROMPT};

/// Pick `round(len * pct_chunks)` chunks from every document, then cap the
/// pool at `chunks_limit`. Reproducible for a seeded `rng`.
pub fn sample_context_texts<'a, R: Rng + ?Sized>(
    documents: &[Vec<&'a str>],
    pct_chunks: f64,
    chunks_limit: usize,
    rng: &mut R,
) -> Vec<&'a str> {
    let pct = pct_chunks.clamp(0.0, 1.0);
    let mut pool: Vec<&'a str> = Vec::new();

    for chunks in documents {
        let amount = ((chunks.len() as f64) * pct).round() as usize;
        pool.extend(chunks.choose_multiple(rng, amount).copied());
    }

    if pool.len() > chunks_limit {
        pool = pool.choose_multiple(rng, chunks_limit).copied().collect();
    }
    pool
}

/// Asks a language model to propose an `Ontology` for a domain from a
/// sample of its chunks.
pub struct OntologyExplorer<M> {
    model: M,
    domain_description: Option<String>,
}

impl<M: LanguageModel> OntologyExplorer<M> {
    pub fn new(model: M, domain_description: Option<String>) -> Self {
        Self {
            model,
            domain_description,
        }
    }

    pub async fn find_suitable_ontology<R: Rng + ?Sized>(
        &self,
        documents: &[Vec<&str>],
        pct_chunks: f64,
        chunks_limit: usize,
        rng: &mut R,
    ) -> Result<Ontology, ExtractionError> {
        let texts = sample_context_texts(documents, pct_chunks, chunks_limit, rng);
        if texts.is_empty() {
            warn!("No chunks sampled for ontology discovery, relying on domain description");
        }

        let prompt = build_ontology_prompt(self.domain_description.as_deref(), &texts);
        let response = self
            .model
            .generate(SYSTEM_PROMPT, &prompt, true)
            .await
            .map_err(|e| ExtractionError::provider(format!("{e:#}")))?;

        let ontology = Ontology::from_json(strip_code_fence(&response))
            .map_err(|e| ExtractionError::MalformedResponse(e.to_string()))?;

        info!(
            sampled_chunks = texts.len(),
            labels = ontology.labels().len(),
            relations = ontology.relations().len(),
            "Discovered ontology"
        );
        Ok(ontology)
    }
}
