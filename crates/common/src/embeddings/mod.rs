//! Embedding and cross-encoding services
//!
//! Provides a unified interface over:
//! - A sentence-transformers HTTP server (`/embed`, `/cross_encode`, `/ml_cross_encode`)
//! - Deterministic local models for tests and offline runs

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::http::RetryingClient;
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Scores (query, candidate) pairs jointly.
///
/// Returns one score in `[0, 1]` per candidate, aligned with the input.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    async fn cross_encode(
        &self,
        query: &str,
        candidates: &[String],
        multilingual: bool,
    ) -> Result<Vec<f32>>;
}

/// Embedder and cross-encoder built from one configuration
#[derive(Clone)]
pub struct EmbeddingServices {
    pub embedder: Arc<dyn Embedder>,
    pub cross_encoder: Arc<dyn CrossEncoder>,
}

// ============================================================================
// Sentence-transformers HTTP client
// ============================================================================

#[derive(Serialize)]
struct EmbedRequest<'a> {
    sentences: &'a [String],
}

#[derive(Serialize)]
struct CrossEncodeRequest<'a> {
    question: &'a str,
    sentences: &'a [String],
}

/// Client for a sentence-transformers server
pub struct SentenceTransformersClient {
    http: RetryingClient,
    base_url: String,
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl SentenceTransformersClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let http = RetryingClient::new(
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
            |message| AppError::EmbeddingError { message },
        )?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let result: Result<Vec<Vec<f32>>> = self
            .http
            .post_json(&self.url("embed"), &EmbedRequest { sentences: texts })
            .await;
        crate::metrics::record_embedding(
            start.elapsed().as_secs_f64(),
            &self.model,
            texts.len(),
            result.is_ok(),
        );

        let vectors = result?;
        if vectors.len() != texts.len() {
            return Err(AppError::EmbeddingError {
                message: format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for SentenceTransformersClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_chunk(&[text.to_string()]).await?;
        embeddings.into_iter().next().ok_or_else(|| AppError::EmbeddingError {
            message: "Empty response".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            all_embeddings.extend(self.embed_chunk(chunk).await?);
        }
        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[async_trait]
impl CrossEncoder for SentenceTransformersClient {
    async fn cross_encode(
        &self,
        query: &str,
        candidates: &[String],
        multilingual: bool,
    ) -> Result<Vec<f32>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let path = if multilingual { "ml_cross_encode" } else { "cross_encode" };
        let scores: Vec<f32> = self
            .http
            .post_json(
                &self.url(path),
                &CrossEncodeRequest {
                    question: query,
                    sentences: candidates,
                },
            )
            .await
            .map_err(|e| match e {
                AppError::EmbeddingError { message } => AppError::CrossEncoderError { message },
                other => other,
            })?;

        if scores.len() != candidates.len() {
            return Err(AppError::CrossEncoderError {
                message: format!("expected {} scores, got {}", candidates.len(), scores.len()),
            });
        }
        Ok(scores)
    }
}

// ============================================================================
// Local models
// ============================================================================

/// Deterministic bag-of-words embedder.
///
/// Each lowercased word is hashed into a bucket; texts sharing words end up
/// close in cosine space. Stable across runs and platforms.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in crate::db::scoring::tokenize(text) {
            let digest = Sha256::digest(word.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn model_name(&self) -> &str {
        "hashing-bow"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cross-encoder scoring by word overlap: share of query words present in
/// the candidate
#[derive(Default)]
pub struct StaticCrossEncoder;

#[async_trait]
impl CrossEncoder for StaticCrossEncoder {
    async fn cross_encode(
        &self,
        query: &str,
        candidates: &[String],
        _multilingual: bool,
    ) -> Result<Vec<f32>> {
        let query_words: HashSet<String> = crate::db::scoring::tokenize(query).into_iter().collect();
        if query_words.is_empty() {
            return Ok(vec![0.0; candidates.len()]);
        }

        Ok(candidates
            .iter()
            .map(|candidate| {
                let words: HashSet<String> =
                    crate::db::scoring::tokenize(candidate).into_iter().collect();
                let shared = query_words.intersection(&words).count();
                shared as f32 / query_words.len() as f32
            })
            .collect())
    }
}

/// Create embedding services based on configuration
pub fn create_embedding_services(config: &EmbeddingConfig) -> Result<EmbeddingServices> {
    match config.provider.as_str() {
        "sentence-transformers" => {
            let client = Arc::new(SentenceTransformersClient::new(config)?);
            Ok(EmbeddingServices {
                embedder: client.clone(),
                cross_encoder: client,
            })
        }
        "hashing" | "mock" => Ok(EmbeddingServices {
            embedder: Arc::new(HashingEmbedder::new(config.dimension)),
            cross_encoder: Arc::new(StaticCrossEncoder),
        }),
        other => Err(AppError::Configuration {
            message: format!("Unknown embedding provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::scoring::cosine_similarity;

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("Sthack conference").await.unwrap();
        let b = embedder.embed("sthack CONFERENCE").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hashing_embedder_similarity() {
        let embedder = HashingEmbedder::new(256);
        let texts = vec![
            "t-shirt order shipped".to_string(),
            "your t-shirt order".to_string(),
            "insurance contract renewal".to_string(),
        ];
        let vectors = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert!(cosine_similarity(&vectors[0], &vectors[1]) > cosine_similarity(&vectors[0], &vectors[2]));
    }

    #[tokio::test]
    async fn test_static_cross_encoder() {
        let encoder = StaticCrossEncoder;
        let scores = encoder
            .cross_encode(
                "when was the t-shirt shipped",
                &["the t-shirt was shipped monday".to_string(), "hello".to_string()],
                false,
            )
            .await
            .unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[tokio::test]
    async fn test_cross_encode_empty_candidates_skips_request() {
        let config = EmbeddingConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..EmbeddingConfig::default()
        };
        let client = SentenceTransformersClient::new(&config).unwrap();
        let scores = client.cross_encode("question", &[], true).await.unwrap();
        assert!(scores.is_empty());
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let config = EmbeddingConfig {
            provider: "carrier-pigeon".into(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            create_embedding_services(&config),
            Err(AppError::Configuration { .. })
        ));
    }
}
