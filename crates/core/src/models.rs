use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One content unit produced by document conversion. Lives only during
/// ingestion; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSection {
    pub text: String,
    /// Heading depth; 0 or `None` means body text.
    pub heading_level: Option<u8>,
    /// Position in the converted document, used to preserve reading order.
    pub index: usize,
}

impl RawSection {
    pub fn body(index: usize, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            heading_level: None,
            index,
        }
    }

    pub fn heading(index: usize, level: u8, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            heading_level: Some(level),
            index,
        }
    }
}

/// A normalized unit of text destined for embedding. Immutable once embedded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub token_count: usize,
    /// Strictly increasing within a document.
    pub source_order: u64,
}

/// Document metadata, enriched or derived from the file name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub name: String,
    pub source: String,
    pub doc_types: Vec<String>,
    pub authors: Option<String>,
    pub published_year: Option<i32>,
    pub description: Option<String>,
}

impl DocumentMeta {
    /// Fallback metadata derived from a file name, used when enrichment is
    /// disabled or fails.
    pub fn from_file_name(file_name: &str) -> Self {
        let stem = file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(file_name);
        Self {
            name: stem.replace(['_', '-'], " ").trim().to_string(),
            source: "pdf".to_string(),
            doc_types: vec!["document".to_string()],
            authors: None,
            published_year: None,
            description: None,
        }
    }
}

/// A stored document row as returned by `list_documents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub name: String,
    pub source: String,
    #[serde(rename = "type", default)]
    pub doc_types: Vec<String>,
    #[serde(default)]
    pub authors: Option<String>,
    #[serde(default)]
    pub published_year: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SearchMode {
    Vector,
    Lexical,
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Vector => "vector",
            SearchMode::Lexical => "text",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

/// Section fields shared by every match variant. References the stored
/// chunk and its document by identifier only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedSection {
    pub section_id: String,
    pub document_id: String,
    pub document_name: String,
    pub document_source: String,
    #[serde(default)]
    pub document_types: Vec<String>,
    #[serde(default)]
    pub document_authors: Option<String>,
    #[serde(default)]
    pub document_published_year: Option<i32>,
    pub content: String,
    pub token_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    #[serde(flatten)]
    pub section: MatchedSection,
    /// `1 - cosine_distance`, in [-1, 1].
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalMatch {
    #[serde(flatten)]
    pub section: MatchedSection,
    /// Non-negative full-text rank.
    pub rank: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridMatch {
    #[serde(flatten)]
    pub section: MatchedSection,
    pub vector_similarity: f32,
    pub text_rank: f32,
    pub combined_score: f32,
}

/// One ranked result, tagged by the mode that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SearchMatch {
    Vector(VectorMatch),
    Lexical(LexicalMatch),
    Hybrid(HybridMatch),
}

impl SearchMatch {
    pub fn section(&self) -> &MatchedSection {
        match self {
            SearchMatch::Vector(hit) => &hit.section,
            SearchMatch::Lexical(hit) => &hit.section,
            SearchMatch::Hybrid(hit) => &hit.section,
        }
    }

    /// The score the result list is ordered by.
    pub fn score(&self) -> f32 {
        match self {
            SearchMatch::Vector(hit) => hit.similarity,
            SearchMatch::Lexical(hit) => hit.rank,
            SearchMatch::Hybrid(hit) => hit.combined_score,
        }
    }
}
