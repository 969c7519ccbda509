//! Embedding service abstraction
//!
//! Provides a unified interface for embedding providers:
//! - Any OpenAI-compatible `/embeddings` endpoint (OpenAI, text-embeddings-inference,
//!   a sentence-transformers sidecar serving all-MiniLM-L6-v2, ...)
//! - A deterministic feature-hashing embedder for offline use

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings.into_iter().next().ok_or_else(|| AppError::EmbeddingError {
            message: "Empty response".to_string(),
        })
    }

    /// Generate embeddings for multiple texts, one vector per input in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension, when known ahead of the first call
    fn dimension(&self) -> Option<usize>;
}

/// Client for an OpenAI-compatible embeddings endpoint
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    batch_size: usize,
    max_retries: u32,
    retry_interval: Duration,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl HttpEmbedder {
    /// Create a new HTTP embedder
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            retry_interval: Duration::from_millis(200),
        })
    }

    /// Override the initial backoff interval
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Make request with retry
    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry_interval)
            .with_max_elapsed_time(None)
            .build();
        let max_retries = self.max_retries;
        let mut attempt = 0u32;

        backoff::future::retry(policy, || {
            attempt += 1;
            let this_attempt = attempt;
            async move {
                match self.make_request(texts).await {
                    Ok(embeddings) => Ok(embeddings),
                    Err(backoff::Error::Transient { err, .. }) if this_attempt <= max_retries => {
                        tracing::warn!(
                            attempt = this_attempt,
                            max_retries = max_retries,
                            error = %err,
                            "Embedding request failed, retrying"
                        );
                        Err(backoff::Error::transient(err))
                    }
                    Err(backoff::Error::Transient { err, .. }) => Err(backoff::Error::permanent(err)),
                    Err(permanent) => Err(permanent),
                }
            }
        })
        .await
    }

    async fn make_request(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, backoff::Error<AppError>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            input: texts,
            model: &self.model,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            backoff::Error::transient(AppError::EmbeddingError {
                message: format!("Request failed: {}", e),
            })
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = AppError::EmbeddingError {
                message: format!("API error {}: {}", status, body),
            };
            return if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                Err(backoff::Error::transient(err))
            } else {
                Err(backoff::Error::permanent(err))
            };
        }

        let result: EmbeddingResponse = response.json().await.map_err(|e| {
            backoff::Error::permanent(AppError::EmbeddingError {
                message: format!("Failed to parse response: {}", e),
            })
        })?;

        if result.data.len() != texts.len() {
            return Err(backoff::Error::permanent(AppError::EmbeddingError {
                message: format!(
                    "Expected {} embeddings, received {}",
                    texts.len(),
                    result.data.len()
                ),
            }));
        }

        let items = result.data;
        if items.iter().all(|item| item.index.is_none()) {
            return Ok(items.into_iter().map(|item| item.embedding).collect());
        }

        // Indices must be a permutation of 0..n.
        let mut slots: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        for item in items {
            match item.index {
                Some(i) if i < slots.len() && slots[i].is_none() => slots[i] = Some(item.embedding),
                other => {
                    return Err(backoff::Error::permanent(AppError::EmbeddingError {
                        message: format!(
                            "Invalid embedding index {:?} for a batch of {}",
                            other,
                            texts.len()
                        ),
                    }));
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            match self.request_with_retry(chunk).await {
                Ok(embeddings) => all_embeddings.extend(embeddings),
                Err(e) => {
                    metrics::record_embedding(start.elapsed().as_secs_f64(), &self.model, texts.len(), false);
                    return Err(e);
                }
            }
        }

        metrics::record_embedding(start.elapsed().as_secs_f64(), &self.model, texts.len(), true);
        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        None
    }
}

/// Deterministic local embedder based on feature hashing.
///
/// Each lower-cased word and each character trigram of the word is hashed
/// into one of `dimension` signed buckets. Texts sharing vocabulary land
/// close together; this is lexical overlap, not a semantic model.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }

    fn embed_text(text: &str, dimension: usize) -> Vec<f32> {
        let mut vector = vec![0.0f32; dimension];
        let lowered = text.to_lowercase();

        for word in lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            add_feature(&mut vector, "w", word, 1.0);

            let padded: Vec<char> = std::iter::once('#')
                .chain(word.chars())
                .chain(std::iter::once('#'))
                .collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                add_feature(&mut vector, "g", &gram, 0.5);
            }
        }

        vector
    }
}

fn add_feature(vector: &mut [f32], kind: &str, feature: &str, weight: f32) {
    let digest = Sha256::new()
        .chain_update(kind.as_bytes())
        .chain_update([0u8])
        .chain_update(feature.as_bytes())
        .finalize();
    let mut bucket_bytes = [0u8; 8];
    bucket_bytes.copy_from_slice(&digest[..8]);
    let bucket = (u64::from_le_bytes(bucket_bytes) % vector.len() as u64) as usize;
    let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
    vector[bucket] += sign * weight;
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let texts = texts.to_vec();
        let dimension = self.dimension;

        // Hashing is CPU work; keep it off the async workers.
        let embeddings = tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|text| Self::embed_text(text, dimension))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| AppError::Internal {
            message: format!("Embedding task failed: {}", e),
        })?;

        metrics::record_embedding(start.elapsed().as_secs_f64(), self.model_name(), embeddings.len(), true);
        Ok(embeddings)
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }
}

/// Mock embedder for testing: a fixed table from text to vector
#[derive(Default)]
pub struct MockEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    fallback: Option<Vec<f32>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `text` to `vector`
    pub fn with_text(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    /// Vector returned for texts not in the table; without one they fail
    pub fn with_fallback(mut self, vector: Vec<f32>) -> Self {
        self.fallback = Some(vector);
        self
    }

    /// Sleep before answering each batch
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of `embed_batch` calls served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        texts
            .iter()
            .map(|text| {
                self.vectors
                    .get(text)
                    .or(self.fallback.as_ref())
                    .cloned()
                    .ok_or_else(|| AppError::EmbeddingError {
                        message: format!("No mock vector for {:?}", text),
                    })
            })
            .collect()
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> Option<usize> {
        self.vectors.values().chain(self.fallback.iter()).next().map(Vec::len)
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "http" => Ok(Arc::new(HttpEmbedder::new(config)?)),
        "hashing" => {
            tracing::warn!(
                dimension = config.dimension,
                "Using the feature-hashing embedder: matching is lexical, not semantic"
            );
            Ok(Arc::new(HashingEmbedder::new(config.dimension)))
        }
        other => Err(AppError::Configuration {
            message: format!("Unknown embedding provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>() / (na * nb)
    }

    fn http_config(server: &MockServer) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "http".to_string(),
            api_base: format!("{}/v1", server.uri()),
            api_key: Some("secret".to_string()),
            max_retries: 2,
            batch_size: 2,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("What is the capital of France?").await.unwrap();
        let b = embedder.embed("What is the capital of France?").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hashing_embedder_prefers_shared_vocabulary() {
        let embedder = HashingEmbedder::new(384);
        let texts = vec![
            "What is the capital of France?".to_string(),
            "what's france's capital?".to_string(),
            "How do I reset my password?".to_string(),
        ];
        let vectors = embedder.embed_batch(&texts).await.unwrap();
        let close = dot(&vectors[0], &vectors[1]);
        let far = dot(&vectors[0], &vectors[2]);
        assert!(close > far, "close={} far={}", close, far);
    }

    #[tokio::test]
    async fn test_hashing_embedder_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        let v = embedder.embed("   ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_mock_embedder_table_and_fallback() {
        let embedder = MockEmbedder::new().with_text("known", vec![1.0, 0.0]);
        assert_eq!(embedder.embed("known").await.unwrap(), vec![1.0, 0.0]);
        assert!(embedder.embed("unknown").await.is_err());
        assert_eq!(embedder.calls(), 2);
        assert_eq!(embedder.dimension(), Some(2));

        let embedder = MockEmbedder::new().with_fallback(vec![0.0, 1.0]);
        assert_eq!(embedder.embed("anything").await.unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_default_provider_is_semantic_model() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.model_name(), "all-MiniLM-L6-v2");
        assert_eq!(embedder.dimension(), None);
    }

    #[test]
    fn test_hashing_provider_is_opt_in() {
        let config = EmbeddingConfig {
            provider: "hashing".to_string(),
            dimension: 32,
            ..EmbeddingConfig::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.model_name(), "feature-hashing");
        assert_eq!(embedder.dimension(), Some(32));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = EmbeddingConfig {
            provider: "carrier-pigeon".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(create_embedder(&config), Err(AppError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_http_embedder_orders_by_index_and_batches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({"input": ["a", "b"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"embedding": [0.0, 2.0], "index": 1},
                    {"embedding": [1.0, 0.0], "index": 0}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({"input": ["c"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [3.0, 3.0], "index": 0}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&http_config(&server)).unwrap();
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let vectors = assert_ok!(embedder.embed_batch(&texts).await);
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 2.0], vec![3.0, 3.0]]);
    }

    #[tokio::test]
    async fn test_http_embedder_rejects_bad_indices() {
        for data in [
            json!([{"embedding": [1.0], "index": 0}, {"embedding": [2.0], "index": 0}]),
            json!([{"embedding": [1.0], "index": 0}, {"embedding": [2.0], "index": 2}]),
            json!([{"embedding": [1.0], "index": 1}, {"embedding": [2.0]}]),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/v1/embeddings"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": data })))
                .expect(1)
                .mount(&server)
                .await;

            let embedder = HttpEmbedder::new(&http_config(&server)).unwrap();
            let texts = vec!["a".to_string(), "b".to_string()];
            let err = assert_err!(embedder.embed_batch(&texts).await);
            assert!(err.to_string().contains("Invalid embedding index"), "{}", err);
        }
    }

    #[tokio::test]
    async fn test_http_embedder_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [0.5, 0.5]}]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&http_config(&server))
            .unwrap()
            .with_retry_interval(Duration::from_millis(5));
        let vector = assert_ok!(embedder.embed("hello").await);
        assert_eq!(vector, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_http_embedder_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&http_config(&server))
            .unwrap()
            .with_retry_interval(Duration::from_millis(5));
        let err = assert_err!(embedder.embed("hello").await);
        assert!(matches!(err, AppError::EmbeddingError { .. }));
    }

    #[tokio::test]
    async fn test_http_embedder_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&http_config(&server))
            .unwrap()
            .with_retry_interval(Duration::from_millis(5));
        assert_err!(embedder.embed("hello").await);
    }

    #[tokio::test]
    async fn test_http_embedder_rejects_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&http_config(&server)).unwrap();
        let err = assert_err!(embedder.embed("hello").await);
        assert!(err.to_string().contains("Expected 1 embeddings"));
    }
}
