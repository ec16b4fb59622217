use crate::embeddings::cosine_similarity;
use crate::error::StoreError;
use crate::models::{
    Chunk, DocumentMeta, DocumentRecord, LexicalMatch, MatchedSection, VectorMatch,
};
use crate::store::SectionStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;
use uuid::Uuid;

/// In-process reference store: exact cosine scan over every stored section
/// and a term-frequency lexical index. Rows keep insertion order, which
/// makes equal-score results stable.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    documents: Vec<StoredDocument>,
    sections: Vec<StoredSection>,
}

struct StoredDocument {
    id: String,
    meta: DocumentMeta,
    created_at: chrono::DateTime<Utc>,
}

struct StoredSection {
    id: String,
    document_id: String,
    chunk: Chunk,
    embedding: Vec<f32>,
}

const STOP_WORDS: [&str; 24] = [
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "of", "on", "or", "that", "the", "to", "was", "what", "with",
];

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn section_view(&self, inner: &Inner, section: &StoredSection) -> MatchedSection {
        let meta = inner
            .documents
            .iter()
            .find(|doc| doc.id == section.document_id);

        MatchedSection {
            section_id: section.id.clone(),
            document_id: section.document_id.clone(),
            document_name: meta.map(|d| d.meta.name.clone()).unwrap_or_default(),
            document_source: meta.map(|d| d.meta.source.clone()).unwrap_or_default(),
            document_types: meta.map(|d| d.meta.doc_types.clone()).unwrap_or_default(),
            document_authors: meta.and_then(|d| d.meta.authors.clone()),
            document_published_year: meta.and_then(|d| d.meta.published_year),
            content: section.chunk.content.clone(),
            token_count: section.chunk.token_count,
        }
    }
}

/// Term-frequency rank in [0, 1]: matched query-term occurrences over the
/// section's word count. Zero when no term matches.
fn lexical_rank(content: &str, terms: &[String]) -> f32 {
    let words: Vec<String> = content
        .split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|word| !word.is_empty())
        .collect();

    if words.is_empty() || terms.is_empty() {
        return 0.0;
    }

    let matches = words
        .iter()
        .filter(|word| terms.iter().any(|term| word.as_str() == term))
        .count();

    matches as f32 / words.len() as f32
}

fn query_terms(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|word| !word.is_empty() && !STOP_WORDS.contains(&word.as_str()))
        .collect()
}

#[async_trait]
impl SectionStore for MemoryStore {
    async fn insert_document(&self, meta: &DocumentMeta) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.documents.push(StoredDocument {
            id: id.clone(),
            meta: meta.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn insert_section(
        &self,
        document_id: &str,
        chunk: &Chunk,
        embedding: &[f32],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.documents.iter().any(|doc| doc.id == document_id) {
            return Err(StoreError::UnknownDocument(document_id.to_string()));
        }
        inner.sections.push(StoredSection {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            chunk: chunk.clone(),
            embedding: embedding.to_vec(),
        });
        Ok(())
    }

    async fn query_vector(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<VectorMatch>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let mut hits: Vec<VectorMatch> = inner
            .sections
            .iter()
            .map(|section| VectorMatch {
                section: self.section_view(&inner, section),
                similarity: cosine_similarity(embedding, &section.embedding),
            })
            .filter(|hit| hit.similarity > threshold)
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn query_lexical(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<LexicalMatch>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let terms = query_terms(text);

        let mut hits: Vec<LexicalMatch> = inner
            .sections
            .iter()
            .filter_map(|section| {
                let rank = lexical_rank(&section.chunk.content, &terms);
                if rank > 0.0 {
                    Some(LexicalMatch {
                        section: self.section_view(&inner, section),
                        rank,
                    })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.rank
                .partial_cmp(&a.rank)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .documents
            .iter()
            .map(|doc| DocumentRecord {
                id: doc.id.clone(),
                name: doc.meta.name.clone(),
                source: doc.meta.source.clone(),
                doc_types: doc.meta.doc_types.clone(),
                authors: doc.meta.authors.clone(),
                published_year: doc.meta.published_year,
                description: doc.meta.description.clone(),
                created_at: Some(doc.created_at),
            })
            .collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = inner.documents.len();
        inner.documents.retain(|doc| doc.id != document_id);
        if inner.documents.len() == before {
            return Err(StoreError::UnknownDocument(document_id.to_string()));
        }
        inner
            .sections
            .retain(|section| section.document_id != document_id);
        Ok(())
    }
}
