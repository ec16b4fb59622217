use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;
use crate::tokenize::count_tokens;
use async_trait::async_trait;
use serde_json::{json, Value};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

/// A service that turns text into a fixed-length vector.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn create_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Wraps an [`EmbeddingClient`] with the validation every caller depends on:
/// input size is checked before the call and the returned vector length
/// after it. A wrongly sized vector corrupts every downstream similarity
/// computation, so a mismatch is a hard failure here, never a warning.
///
/// The gateway performs no retries; retry policy belongs to the caller.
pub struct EmbeddingGateway<C> {
    client: C,
    max_input_tokens: usize,
}

impl<C: EmbeddingClient> EmbeddingGateway<C> {
    pub fn new(client: C, config: &EmbeddingConfig) -> Self {
        Self {
            client,
            max_input_tokens: config.max_input_tokens,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.client.dimensions()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        // Tokenization fails deterministically; retrying it is useless.
        let tokens = count_tokens(text)
            .map_err(|error| EmbeddingError::InvalidInput(error.to_string()))?;
        if tokens > self.max_input_tokens {
            return Err(EmbeddingError::InputTooLarge {
                tokens,
                limit: self.max_input_tokens,
            });
        }

        let vector = self.client.create_embedding(text).await?;
        let expected = self.client.dimensions();
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        Ok(vector)
    }
}

/// OpenAI embeddings API client. One request per call, no batching, no
/// internal retries; transient failures are surfaced for the caller's
/// backoff policy.
pub struct OpenAiEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbeddingClient {
    pub fn new(api_key: impl Into<String>, config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| EmbeddingError::Transient(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn create_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": text,
            }))
            .send()
            .await
            .map_err(|error| EmbeddingError::Transient(error.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Transient(format!(
                "embedding service returned {status}: {detail}"
            )));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| EmbeddingError::Transient(error.to_string()))?;

        let embedding = payload
            .pointer("/data/0/embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| EmbeddingError::Rejected {
                status: status.as_u16(),
                detail: "response missing data[0].embedding".to_string(),
            })?;

        Ok(embedding
            .iter()
            .map(|value| value.as_f64().unwrap_or(0.0) as f32)
            .collect())
    }
}

/// Deterministic character-trigram hashing embedder. Stands in for the
/// remote service in tests and offline runs; vectors are L2-normalised so
/// cosine scores stay comparable.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl HashingEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingClient for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing-trigram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn create_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed(text))
    }
}

/// Cosine similarity in [-1, 1]. Mismatched or empty vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClient {
        dimensions: usize,
        returned: usize,
    }

    #[async_trait]
    impl EmbeddingClient for FixedClient {
        fn model_name(&self) -> &str {
            "fixed"
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        async fn create_embedding(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.5; self.returned])
        }
    }

    fn config_with_dims(dimensions: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            dimensions,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn gateway_accepts_exact_dimension_vector() {
        let gateway = EmbeddingGateway::new(
            FixedClient {
                dimensions: 1536,
                returned: 1536,
            },
            &config_with_dims(1536),
        );
        let vector = gateway.embed("some meaningful text").await.unwrap();
        assert_eq!(vector.len(), 1536);
    }

    #[tokio::test]
    async fn gateway_rejects_dimension_mismatch() {
        let gateway = EmbeddingGateway::new(
            FixedClient {
                dimensions: 1536,
                returned: 768,
            },
            &config_with_dims(1536),
        );
        let error = gateway.embed("some meaningful text").await.unwrap_err();
        assert!(matches!(
            error,
            EmbeddingError::DimensionMismatch {
                expected: 1536,
                actual: 768
            }
        ));
    }

    #[tokio::test]
    async fn gateway_rejects_empty_input() {
        let gateway = EmbeddingGateway::new(
            FixedClient {
                dimensions: 8,
                returned: 8,
            },
            &config_with_dims(8),
        );
        assert!(matches!(
            gateway.embed("   ").await.unwrap_err(),
            EmbeddingError::EmptyInput
        ));
    }

    #[tokio::test]
    async fn gateway_rejects_oversized_input() {
        let gateway = EmbeddingGateway::new(
            FixedClient {
                dimensions: 8,
                returned: 8,
            },
            &config_with_dims(8),
        );
        // ~16k tokens, well above the 8191 limit
        let text = "word ".repeat(16_000);
        let error = gateway.embed(&text).await.unwrap_err();
        assert!(matches!(error, EmbeddingError::InputTooLarge { .. }));
    }

    #[tokio::test]
    async fn gateway_untokenizable_input_is_not_retryable() {
        let gateway = EmbeddingGateway::new(
            FixedClient {
                dimensions: 8,
                returned: 8,
            },
            &config_with_dims(8),
        );
        // above the tokenizer's byte cap
        let text = "a".repeat((1 << 20) + 1);
        let error = gateway.embed(&text).await.unwrap_err();
        assert!(matches!(error, EmbeddingError::InvalidInput(_)));
        assert!(!error.is_transient());
    }

    #[test]
    fn hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder { dimensions: 64 };
        assert_eq!(embedder.embed("presence and awareness"), embedder.embed("presence and awareness"));
    }

    #[test]
    fn hashing_embedder_outputs_requested_length() {
        let embedder = HashingEmbedder { dimensions: 32 };
        assert_eq!(embedder.embed("abc").len(), 32);
    }

    #[test]
    fn cosine_bounds() {
        let a = vec![1.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }
}
