use crate::error::IngestError;
use crate::models::DocumentMeta;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const METADATA_MODEL: &str = "gpt-4o";
const DESCRIPTION_MODEL: &str = "gpt-4o";
const CLASSIFICATION_MODEL: &str = "gpt-4o-mini";
const METADATA_SAMPLE_CHARS: usize = 4000;
const CLASSIFICATION_SAMPLE_CHARS: usize = 2000;

/// The document library's fixed category taxonomy. Classification answers
/// are validated against this list; anything else falls back to
/// "Psychotherapy".
pub const CATEGORIES: [&str; 27] = [
    "Anxiety Disorders",
    "Behavior Therapy",
    "Borderline Syndromes",
    "Brief Therapy",
    "Chapter eBooks",
    "Child Therapy",
    "Coming Soon",
    "Couple Therapy",
    "Crisis",
    "Depression",
    "Eating Disorders",
    "Family Therapy",
    "Group Therapy",
    "Mood Disorder",
    "New Original Works",
    "Object Relations",
    "Psychiatry",
    "Psychoanalysis",
    "Psychosomatic",
    "Psychotherapy",
    "Psychotherapy and Fiction",
    "Recently Added",
    "Schizophrenia",
    "Sex Therapy",
    "Substance Abuse",
    "Suicide",
    "Supervision",
];

const FALLBACK_CATEGORY: &str = "Psychotherapy";

/// Produces document metadata from a file name and an opening-content
/// sample.
#[async_trait]
pub trait MetadataEnricher: Send + Sync {
    async fn enrich(
        &self,
        file_name: &str,
        content_sample: &str,
    ) -> Result<DocumentMeta, IngestError>;
}

/// Offline fallback: title and author guessed from the file name alone.
/// Recognises "Title by Author" and "Author - Title" shapes.
#[derive(Default)]
pub struct FilenameEnricher;

#[async_trait]
impl MetadataEnricher for FilenameEnricher {
    async fn enrich(
        &self,
        file_name: &str,
        _content_sample: &str,
    ) -> Result<DocumentMeta, IngestError> {
        Ok(meta_from_file_name(file_name)?)
    }
}

fn meta_from_file_name(file_name: &str) -> Result<DocumentMeta, IngestError> {
    let mut meta = DocumentMeta::from_file_name(file_name);

    // Underscores are word separators; a spaced dash separates author from
    // title, so it must be matched before separator cleanup.
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name)
        .replace('_', " ");

    let by_pattern = Regex::new(r"(?i)^(.+?)\s+by\s+(.+)$")?;
    let dash_pattern = Regex::new(r"^(.+?)\s+-\s+(.+)$")?;

    if let Some(captures) = by_pattern.captures(&stem) {
        meta.name = captures[1].trim().replace('-', " ");
        meta.authors = Some(captures[2].trim().replace('-', " "));
    } else if let Some(captures) = dash_pattern.captures(&stem) {
        meta.name = captures[2].trim().to_string();
        meta.authors = Some(captures[1].trim().to_string());
    }

    Ok(meta)
}

/// Chat-model enricher: one call extracts title/authors/year as JSON, a
/// second classifies the document into the fixed category list. Any model
/// failure degrades to the filename fallback rather than failing ingestion.
pub struct OpenAiEnricher {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiEnricher {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| IngestError::InvalidConfig(error.to_string()))?;
        Ok(Self {
            client,
            endpoint: CHAT_COMPLETIONS_URL.to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn chat(&self, model: &str, system: &str, user: &str) -> Option<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
                "temperature": 0.1,
            }))
            .send()
            .await;

        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), "enrichment request rejected");
                return None;
            }
            Err(error) => {
                warn!(%error, "enrichment request failed");
                return None;
            }
        };

        let payload: Value = response.json().await.ok()?;
        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    async fn extract_metadata(&self, content_sample: &str) -> Option<(String, Option<String>, Option<i32>)> {
        let sample = truncate_chars(content_sample, METADATA_SAMPLE_CHARS);
        let prompt = format!(
            "Analyze the following content from the beginning of a book and extract \
             the metadata. Return ONLY valid JSON with keys \"title\", \"authors\" and \
             \"published_year\" (integer or null). Look for copyright dates and \
             publication dates.\n\nContent:\n{sample}"
        );
        let answer = self
            .chat(
                METADATA_MODEL,
                "You are a book metadata extraction specialist. Return only valid JSON \
                 with the requested fields.",
                &prompt,
            )
            .await?;

        let parsed: Value = serde_json::from_str(extract_json_object(&answer)?).ok()?;
        let title = parsed.get("title")?.as_str()?.trim().to_string();
        if title.is_empty() {
            return None;
        }
        let authors = parsed
            .get("authors")
            .and_then(Value::as_str)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let published_year = parsed
            .get("published_year")
            .and_then(Value::as_i64)
            .map(|year| year as i32);

        Some((title, authors, published_year))
    }

    async fn describe(&self, title: &str, authors: Option<&str>) -> Option<String> {
        let mut prompt = format!(
            "Provide a 200-300 word description of the book \"{title}\""
        );
        if let Some(authors) = authors {
            prompt.push_str(&format!(" by {authors}"));
        }
        prompt.push_str(
            ". Cover its main content, key themes and intended audience. \
             Focus on factual content about the book itself; avoid reviews, \
             ratings and publication details.",
        );

        let answer = self
            .chat(
                DESCRIPTION_MODEL,
                "You are a book information specialist. Provide accurate, \
                 informative book descriptions based on reliable sources.",
                &prompt,
            )
            .await?;

        clean_description(&answer).filter(|text| !text.is_empty())
    }

    async fn classify(&self, content_sample: &str) -> Vec<String> {
        let sample = truncate_chars(content_sample, CLASSIFICATION_SAMPLE_CHARS);
        let prompt = format!(
            "Classify this document into 1-3 of the available categories. Return only \
             the category names, separated by commas.\n\nAvailable categories:\n{}\n\n\
             Document content sample:\n{sample}",
            CATEGORIES.join(", ")
        );
        let answer = self
            .chat(
                CLASSIFICATION_MODEL,
                "You are a document classifier for psychology and therapy materials. \
                 Return only the category names separated by commas.",
                &prompt,
            )
            .await;

        let valid = answer
            .map(|text| validate_categories(&text))
            .unwrap_or_default();
        if valid.is_empty() {
            vec![FALLBACK_CATEGORY.to_string()]
        } else {
            valid
        }
    }
}

#[async_trait]
impl MetadataEnricher for OpenAiEnricher {
    async fn enrich(
        &self,
        file_name: &str,
        content_sample: &str,
    ) -> Result<DocumentMeta, IngestError> {
        let mut meta = meta_from_file_name(file_name)?;

        match self.extract_metadata(content_sample).await {
            Some((title, authors, published_year)) => {
                meta.name = title;
                if authors.is_some() {
                    meta.authors = authors;
                }
                meta.published_year = published_year;
            }
            None => debug!(file_name, "metadata extraction fell back to file name"),
        }

        meta.doc_types = self.classify(content_sample).await;
        meta.description = self.describe(&meta.name, meta.authors.as_deref()).await;
        Ok(meta)
    }
}

/// Models sometimes wrap JSON answers in prose or code fences; take the
/// outermost object.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

/// Models citing sources leave markdown links behind; keep the link text.
fn clean_description(text: &str) -> Option<String> {
    let citation = Regex::new(r"\[([^\]]*)\]\(https?://[^\s)]+\)").ok()?;
    Some(citation.replace_all(text.trim(), "$1").into_owned())
}

fn validate_categories(answer: &str) -> Vec<String> {
    answer
        .split(',')
        .map(str::trim)
        .filter_map(|candidate| {
            CATEGORIES
                .iter()
                .find(|category| category.eq_ignore_ascii_case(candidate))
                .map(|category| category.to_string())
        })
        .collect()
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn filename_enricher_recognises_by_pattern() {
        let meta = FilenameEnricher
            .enrich("The_Power_of_Now_by_Eckhart_Tolle.pdf", "")
            .await
            .unwrap();
        assert_eq!(meta.name, "The Power of Now");
        assert_eq!(meta.authors.as_deref(), Some("Eckhart Tolle"));
    }

    #[tokio::test]
    async fn filename_enricher_recognises_dash_pattern() {
        let meta = FilenameEnricher
            .enrich("Yalom - Existential Psychotherapy.pdf", "")
            .await
            .unwrap();
        assert_eq!(meta.name, "Existential Psychotherapy");
        assert_eq!(meta.authors.as_deref(), Some("Yalom"));
    }

    #[tokio::test]
    async fn filename_enricher_plain_name_has_no_author() {
        let meta = FilenameEnricher.enrich("mindfulness.pdf", "").await.unwrap();
        assert_eq!(meta.name, "mindfulness");
        assert!(meta.authors.is_none());
    }

    #[test]
    fn json_object_is_extracted_from_fenced_answer() {
        let answer = "```json\n{\"title\": \"X\"}\n```";
        assert_eq!(extract_json_object(answer), Some("{\"title\": \"X\"}"));
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn description_cleanup_strips_citation_links() {
        let raw = "A guide to presence [Tolle](https://example.org/tolle) and \
                   stillness.\n";
        assert_eq!(
            clean_description(raw).unwrap(),
            "A guide to presence Tolle and stillness."
        );
        assert_eq!(clean_description("plain text").unwrap(), "plain text");
    }

    #[test]
    fn category_validation_drops_unknown_names() {
        let valid = validate_categories("Depression, Astrology, group therapy");
        assert_eq!(
            valid,
            vec!["Depression".to_string(), "Group Therapy".to_string()]
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(10);
        assert_eq!(truncate_chars(&text, 4).chars().count(), 4);
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
