use anyhow::{Context, Result};
use ingest::Chunk;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }

    pub fn default() -> Self {
        Self::new(
            "http://localhost:11434".to_string(),
            "nomic-embed-text".to_string(),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate embedding for text
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send embedding request")?;

        if !response.status().is_success() {
            anyhow::bail!("Embedding request failed: {}", response.status());
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        Ok(embedding_response.embedding)
    }

    /// Embed every chunk that has no embedding from this model yet.
    /// Returns how many chunks were embedded.
    pub async fn embed_chunks(&self, chunks: &mut [Chunk]) -> Result<usize> {
        let mut embedded = 0;
        for chunk in chunks.iter_mut() {
            if chunk.embedding.is_some() && chunk.embeddings_model.as_deref() == Some(self.model()) {
                continue;
            }
            let embedding = self
                .embed(&chunk.text)
                .await
                .with_context(|| format!("Failed to embed chunk {}", chunk.chunk_id))?;
            chunk.set_embedding(&self.model, embedding);
            embedded += 1;
        }
        debug!(model = %self.model, embedded, "Embedded chunks");
        Ok(embedded)
    }

    /// Get embedding dimension
    pub async fn get_dimension(&self) -> Result<usize> {
        let test_embedding = self.embed("test").await?;
        Ok(test_embedding.len())
    }
}

/// Cosine similarity; 0 when either vector is zero or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_embed_chunks_skips_already_embedded() {
        // Unreachable endpoint: any request would fail the call.
        let client = EmbeddingClient::new("http://127.0.0.1:9".to_string(), "test-model".to_string());
        let mut chunk = Chunk::new("doc".to_string(), 0, "text".to_string(), 10, 0);
        chunk.set_embedding("test-model", vec![0.1, 0.2]);

        let embedded = client.embed_chunks(std::slice::from_mut(&mut chunk)).await.unwrap();
        assert_eq!(embedded, 0);
    }
}
