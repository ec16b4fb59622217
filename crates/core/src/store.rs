use crate::error::StoreError;
use crate::models::{Chunk, DocumentMeta, DocumentRecord, LexicalMatch, VectorMatch};
use async_trait::async_trait;

/// Durable storage for documents and their embedded sections, with indexed
/// vector and lexical queries.
///
/// `insert_section` writes content, embedding and token count as one atomic
/// row; there is never a chunk without its embedding in the store.
#[async_trait]
pub trait SectionStore: Send + Sync {
    /// Insert document metadata and return its identifier.
    async fn insert_document(&self, meta: &DocumentMeta) -> Result<String, StoreError>;

    /// Insert one embedded chunk for a document.
    async fn insert_section(
        &self,
        document_id: &str,
        chunk: &Chunk,
        embedding: &[f32],
    ) -> Result<(), StoreError>;

    /// Nearest-neighbour query by cosine similarity. Only rows with
    /// `similarity > threshold` are returned, best first. Pass a negative
    /// threshold to fetch unfiltered candidates.
    async fn query_vector(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<VectorMatch>, StoreError>;

    /// Natural-language full-text query, best rank first.
    async fn query_lexical(&self, text: &str, limit: usize)
        -> Result<Vec<LexicalMatch>, StoreError>;

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, StoreError>;

    /// Delete a document and, by cascade, all of its sections.
    async fn delete_document(&self, document_id: &str) -> Result<(), StoreError>;
}
