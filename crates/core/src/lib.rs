pub mod chunker;
pub mod config;
pub mod converter;
pub mod embeddings;
pub mod enrich;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod models;
pub mod ranking;
pub mod store;
pub mod stores;
pub mod tokenize;

pub use chunker::{ChunkNormalizer, NormalizedChunks, SkippedSection};
pub use config::{ChunkingConfig, EmbeddingConfig, PipelineConfig, RetryPolicy, SearchConfig};
pub use converter::{DocumentConverter, LopdfConverter};
pub use embeddings::{
    cosine_similarity, EmbeddingClient, EmbeddingGateway, HashingEmbedder, OpenAiEmbeddingClient,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use enrich::{FilenameEnricher, MetadataEnricher, OpenAiEnricher};
pub use error::{EmbeddingError, IngestError, SearchError, StoreError};
pub use filter::ContentFilter;
pub use ingest::{
    discover_pdf_files, digest_file, BatchReport, CancelFlag, ChunkFailure, DocumentReport,
    IngestionPipeline, SkippedFile,
};
pub use models::{
    Chunk, DocumentMeta, DocumentRecord, HybridMatch, LexicalMatch, MatchedSection, RawSection,
    SearchMatch, SearchMode, VectorMatch,
};
pub use ranking::RankingEngine;
pub use store::SectionStore;
pub use stores::{MemoryStore, SupabaseStore};
pub use tokenize::{count_tokens, tokenize};
