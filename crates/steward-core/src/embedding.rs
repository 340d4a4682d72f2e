//! Embedding provider boundary
//!
//! The engine treats text embedding as an external collaborator: all it
//! requires is a deterministic `embed(text) -> vector` contract at a fixed
//! dimensionality. A hash-based local embedder covers tests and degraded
//! operation; deployments point `HttpEmbedder` at a real model server.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{EmbeddingError, Result};

/// Fixed embedding dimensionality, enforced at every write boundary
pub const EMBEDDING_DIM: usize = 384;

/// Turns text into a fixed-length vector.
///
/// Empty or whitespace-only input yields `Ok(None)`: the record can still
/// be stored where the schema allows it, it simply never surfaces through
/// similarity search.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text, or `None` for empty input
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>>;

    /// Dimensionality of produced vectors
    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Validate a vector against the engine's fixed dimensionality
pub fn ensure_dimension(vector: &[f32]) -> Result<()> {
    if vector.len() != EMBEDDING_DIM {
        return Err(EmbeddingError::DimensionMismatch {
            expected: EMBEDDING_DIM,
            actual: vector.len(),
        }
        .into());
    }
    Ok(())
}

/// Compute cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Deterministic local embedder.
///
/// Character-frequency features, L2-normalized. Not semantically strong,
/// but deterministic and dependency-free, which is what tests and degraded
/// operation need: identical texts always map to identical vectors, so
/// dedup-by-similarity still works.
#[derive(Debug, Default, Clone)]
pub struct HashEmbedder;

impl HashEmbedder {
    /// Create a new hash embedder
    pub fn new() -> Self {
        Self
    }

    fn embed_sync(text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; EMBEDDING_DIM];

        for (i, ch) in text.chars().enumerate() {
            let idx = (ch as usize + i) % EMBEDDING_DIM;
            embedding[idx] += 1.0;
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::embed_sync(text)))
    }
}

/// HTTP-backed embedding provider.
///
/// Posts `{"input": text}` and expects `{"embedding": [f32; 384]}`. Any
/// transport or shape failure surfaces as `EmbeddingError::Provider`; the
/// caller decides whether the write as a whole must fail.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    /// Create a provider against the given endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "input": text }))
            .send()
            .await
            .map_err(|e| EmbeddingError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Provider(format!(
                "embedding endpoint returned {}",
                response.status()
            ))
            .into());
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Provider(e.to_string()))?;

        ensure_dimension(&body.embedding)?;
        Ok(Some(body.embedding))
    }
}
