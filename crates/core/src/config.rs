use crate::error::IngestError;
use std::time::Duration;

/// Token bounds for chunk normalization. Values are counted with the
/// deterministic tokenizer in [`crate::tokenize`].
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    /// Chunks below this are merged with neighbours.
    pub min_tokens: usize,
    /// Target size; the buffer closes once it reaches this.
    pub optimal_tokens: usize,
    /// Hard upper bound; sections above it are split at sentence boundaries.
    pub max_tokens: usize,
    /// Context carried between pieces of a split section.
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_tokens: 100,
            optimal_tokens: 512,
            max_tokens: 800,
            overlap_tokens: 50,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.min_tokens == 0 || self.min_tokens >= self.optimal_tokens {
            return Err(IngestError::InvalidConfig(format!(
                "min_tokens {} must be positive and below optimal_tokens {}",
                self.min_tokens, self.optimal_tokens
            )));
        }
        if self.optimal_tokens > self.max_tokens {
            return Err(IngestError::InvalidConfig(format!(
                "optimal_tokens {} must not exceed max_tokens {}",
                self.optimal_tokens, self.max_tokens
            )));
        }
        if self.overlap_tokens >= self.optimal_tokens {
            return Err(IngestError::InvalidConfig(format!(
                "overlap_tokens {} must be below optimal_tokens {}",
                self.overlap_tokens, self.optimal_tokens
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimensions: usize,
    /// Inputs above this many tokens fail with `InputTooLarge` instead of
    /// being truncated.
    pub max_input_tokens: usize,
    pub timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            max_input_tokens: 8191,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SearchConfig {
    pub limit: usize,
    /// Minimum cosine similarity a vector hit must exceed.
    pub similarity_threshold: f32,
    pub vector_weight: f32,
    pub text_weight: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: 5,
            similarity_threshold: 0.4,
            vector_weight: 0.7,
            text_weight: 0.3,
        }
    }
}

/// Bounded retry with exponential backoff, owned by the ingestion pipeline.
/// The embedding gateway itself never retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based): base, 2x base, 4x base, ...
    /// capped at 32x.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(5);
        self.base_delay * factor
    }
}

/// Everything the ingestion pipeline needs, passed in at construction so
/// tests can vary it per case.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retry: RetryPolicy,
    pub embed_concurrency: Option<usize>,
}

impl PipelineConfig {
    /// Worker pool size for concurrent chunk embedding, defaulting to a
    /// small pool sized for typical API rate limits.
    pub fn embed_workers(&self) -> usize {
        self.embed_concurrency.unwrap_or(4).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chunking_config_is_valid() {
        assert!(ChunkingConfig::default().validate().is_ok());
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let config = ChunkingConfig {
            min_tokens: 600,
            optimal_tokens: 512,
            max_tokens: 800,
            overlap_tokens: 50,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(9), Duration::from_secs(32));
    }
}
