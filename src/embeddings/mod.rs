//! Embedding boundary. The vector index takes an [`Embedder`] so tests can
//! swap in a deterministic fake; production wires [`ApiEmbedder`] against
//! the same OpenAI-compatible service as generation.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{LlmConfig, RetrievalConfig};

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

pub struct ApiEmbedder {
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    client: Client,
}

impl ApiEmbedder {
    pub fn new(llm: &LlmConfig, retrieval: &RetrievalConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(llm.request_timeout_secs))
            .build()?;

        Ok(Self {
            base_url: llm.base_url.trim_end_matches('/').to_string(),
            api_key: llm.api_key.clone(),
            model: llm.embedding_model.clone(),
            dimension: retrieval.embedding_dimension,
            client,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Test doubles shared across the crate's unit tests.
#[cfg(test)]
pub mod testing {
    use super::Embedder;
    use async_trait::async_trait;

    /// Deterministic embedder: hashes each word into a small fixed-size
    /// bag-of-words vector, so identical texts embed identically and texts
    /// sharing words land nearby under cosine distance.
    pub struct HashEmbedder {
        dim: usize,
    }

    impl HashEmbedder {
        pub fn new(dim: usize) -> Self {
            Self { dim }
        }

        fn embed_one(&self, text: &str) -> Vec<f32> {
            let mut v = vec![0.0f32; self.dim];
            for word in text.split_whitespace() {
                let mut h: u64 = 1469598103934665603;
                for b in word.to_lowercase().bytes() {
                    h ^= b as u64;
                    h = h.wrapping_mul(1099511628211);
                }
                v[(h % self.dim as u64) as usize] += 1.0;
            }
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for x in &mut v {
                    *x /= norm;
                }
            } else {
                v[0] = 1.0;
            }
            v
        }
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        fn dimension(&self) -> usize {
            self.dim
        }

        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| self.embed_one(t)).collect())
        }
    }
}

#[async_trait]
impl Embedder for ApiEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let endpoint = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Embedding request to {} failed: {}", endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(anyhow!("Embedding API error ({}): {}", status, error));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse embedding response: {}", e))?;

        if parsed.data.len() != texts.len() {
            return Err(anyhow!(
                "Embedding count mismatch: sent {}, got {}",
                texts.len(),
                parsed.data.len()
            ));
        }

        for item in &parsed.data {
            if item.embedding.len() != self.dimension {
                return Err(anyhow!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    item.embedding.len()
                ));
            }
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}
