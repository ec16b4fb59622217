use thiserror::Error;

/// Failures raised by the embedding client or the gateway around it.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("input of {tokens} tokens exceeds the embedding limit of {limit}")]
    InputTooLarge { tokens: usize, limit: usize },

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding input is empty")]
    EmptyInput,

    #[error("embedding input rejected: {0}")]
    InvalidInput(String),

    #[error("transient embedding failure: {0}")]
    Transient(String),

    #[error("embedding request rejected with status {status}: {detail}")]
    Rejected { status: u16, detail: String },
}

impl EmbeddingError {
    /// True when a retry with backoff may succeed (rate limits, timeouts,
    /// network failures). Dimension and size violations never are.
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request timed out")]
    Timeout,

    #[error("invalid response from {backend}: {details}")]
    Backend { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("unknown document: {0}")]
    UnknownDocument(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document conversion failed: {0}")]
    Conversion(String),

    #[error("tokenization failed for section {position}: {reason}")]
    Tokenization { position: usize, reason: String },

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("ingestion cancelled after {completed} chunks")]
    Cancelled { completed: usize },
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query is empty")]
    EmptyQuery,

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
