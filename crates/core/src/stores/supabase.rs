use crate::error::StoreError;
use crate::models::{
    Chunk, DocumentMeta, DocumentRecord, LexicalMatch, MatchedSection, VectorMatch,
};
use crate::store::SectionStore;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

const BACKEND: &str = "supabase";

/// Section store over Supabase PostgREST: `documents` and
/// `document_sections` tables (pgvector cosine index on `embedding`,
/// full-text index on `content`) plus the search RPC functions.
pub struct SupabaseStore {
    client: Client,
    base: Url,
    service_key: String,
}

impl SupabaseStore {
    pub fn new(
        base_url: &str,
        service_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let base = Url::parse(base_url)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            service_key: service_key.into(),
        })
    }

    fn rest(&self, table: &str) -> Result<Url, StoreError> {
        Ok(self.base.join(&format!("rest/v1/{table}"))?)
    }

    fn rpc(&self, function: &str) -> Result<Url, StoreError> {
        Ok(self.base.join(&format!("rest/v1/rpc/{function}"))?)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let details = response.text().await.unwrap_or_else(|_| status.to_string());
        Err(StoreError::Backend {
            backend: BACKEND.to_string(),
            details: format!("{status}: {details}"),
        })
    }
}

fn map_http(error: reqwest::Error) -> StoreError {
    if error.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Http(error)
    }
}

/// Row shape returned by the search RPC functions: section content joined
/// with its document's metadata, plus the mode-specific score columns.
#[derive(Debug, Deserialize)]
struct RpcRow {
    id: Value,
    document_id: Value,
    content: String,
    token_count: usize,
    document_name: String,
    document_source: String,
    #[serde(default)]
    document_type: Vec<String>,
    #[serde(default)]
    document_authors: Option<String>,
    #[serde(default)]
    document_published_year: Option<i32>,
    #[serde(default)]
    similarity: Option<f32>,
    #[serde(default)]
    rank: Option<f32>,
}

impl RpcRow {
    fn into_section(self) -> (MatchedSection, Option<f32>, Option<f32>) {
        let section = MatchedSection {
            section_id: id_to_string(&self.id),
            document_id: id_to_string(&self.document_id),
            document_name: self.document_name,
            document_source: self.document_source,
            document_types: self.document_type,
            document_authors: self.document_authors,
            document_published_year: self.document_published_year,
            content: self.content,
            token_count: self.token_count,
        };
        (section, self.similarity, self.rank)
    }
}

fn id_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn document_id_value(document_id: &str) -> Value {
    match document_id.parse::<i64>() {
        Ok(numeric) => json!(numeric),
        Err(_) => json!(document_id),
    }
}

#[async_trait]
impl SectionStore for SupabaseStore {
    async fn insert_document(&self, meta: &DocumentMeta) -> Result<String, StoreError> {
        let response = self
            .authed(self.client.post(self.rest("documents")?))
            .header("Prefer", "return=representation")
            .json(&json!({
                "name": meta.name,
                "source": meta.source,
                "type": meta.doc_types,
                "authors": meta.authors,
                "published_year": meta.published_year,
                "description": meta.description,
            }))
            .send()
            .await
            .map_err(map_http)?;

        let rows: Vec<Value> = self.check(response).await?.json().await.map_err(map_http)?;
        let id = rows
            .first()
            .and_then(|row| row.get("id"))
            .ok_or_else(|| StoreError::Backend {
                backend: BACKEND.to_string(),
                details: "document insert returned no id".to_string(),
            })?;
        Ok(id_to_string(id))
    }

    async fn insert_section(
        &self,
        document_id: &str,
        chunk: &Chunk,
        embedding: &[f32],
    ) -> Result<(), StoreError> {
        let response = self
            .authed(self.client.post(self.rest("document_sections")?))
            .json(&json!({
                "document_id": document_id_value(document_id),
                "content": chunk.content,
                "embedding": embedding,
                "token_count": chunk.token_count,
            }))
            .send()
            .await
            .map_err(map_http)?;

        self.check(response).await?;
        Ok(())
    }

    async fn query_vector(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<VectorMatch>, StoreError> {
        let response = self
            .authed(
                self.client
                    .post(self.rpc("match_document_sections_vectorsearch")?),
            )
            .json(&json!({
                "query_embedding": embedding,
                "match_threshold": threshold,
                "match_count": limit,
            }))
            .send()
            .await
            .map_err(map_http)?;

        let rows: Vec<RpcRow> = self.check(response).await?.json().await.map_err(map_http)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let (section, similarity, _) = row.into_section();
                VectorMatch {
                    section,
                    similarity: similarity.unwrap_or(0.0),
                }
            })
            .collect())
    }

    async fn query_lexical(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<LexicalMatch>, StoreError> {
        let response = self
            .authed(
                self.client
                    .post(self.rpc("match_document_sections_textsearch")?),
            )
            .json(&json!({
                "query_text": text,
                "match_count": limit,
            }))
            .send()
            .await
            .map_err(map_http)?;

        let rows: Vec<RpcRow> = self.check(response).await?.json().await.map_err(map_http)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let (section, _, rank) = row.into_section();
                LexicalMatch {
                    section,
                    rank: rank.unwrap_or(0.0),
                }
            })
            .collect())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        let mut url = self.rest("documents")?;
        url.query_pairs_mut().append_pair("select", "*");

        let response = self
            .authed(self.client.get(url))
            .send()
            .await
            .map_err(map_http)?;

        let rows: Vec<Value> = self.check(response).await?.json().await.map_err(map_http)?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| {
                // PostgREST serial ids arrive as numbers; normalise to text.
                if let Some(object) = row.as_object_mut() {
                    if let Some(id) = object.get("id").map(id_to_string) {
                        object.insert("id".to_string(), json!(id));
                    }
                }
                serde_json::from_value(row).ok()
            })
            .collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), StoreError> {
        let mut url = self.rest("documents")?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{document_id}"));

        let response = self
            .authed(self.client.delete(url))
            .send()
            .await
            .map_err(map_http)?;

        self.check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_base_url() {
        let result = SupabaseStore::new("not a url", "key", Duration::from_secs(5));
        assert!(matches!(result, Err(StoreError::Url(_))));
    }

    #[test]
    fn rpc_rows_deserialize_with_score_columns() {
        let payload = json!([{
            "id": 17,
            "document_id": 3,
            "content": "the witness behind thought.",
            "token_count": 128,
            "document_name": "The Power of Now",
            "document_source": "pdf",
            "document_type": ["Psychotherapy"],
            "document_authors": "Eckhart Tolle",
            "document_published_year": 1997,
            "similarity": 0.62
        }]);

        let rows: Vec<RpcRow> = serde_json::from_value(payload).unwrap();
        let (section, similarity, rank) = rows.into_iter().next().unwrap().into_section();

        assert_eq!(section.section_id, "17");
        assert_eq!(section.document_id, "3");
        assert_eq!(section.document_name, "The Power of Now");
        assert_eq!(similarity, Some(0.62));
        assert_eq!(rank, None);
    }

    #[test]
    fn numeric_document_ids_round_trip() {
        assert_eq!(document_id_value("42"), json!(42));
        assert_eq!(
            document_id_value("9d2a7d8e-aaaa-bbbb-cccc-000000000000"),
            json!("9d2a7d8e-aaaa-bbbb-cccc-000000000000")
        );
    }
}
