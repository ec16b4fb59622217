use crate::config::SearchConfig;
use crate::embeddings::{EmbeddingClient, EmbeddingGateway};
use crate::error::SearchError;
use crate::models::{HybridMatch, SearchMatch, SearchMode};
use crate::store::SectionStore;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Hybrid search fetches this many times `limit` candidates from each
/// signal before merging, so a section strong in only one signal still
/// reaches the combined ranking.
const CANDIDATE_FACTOR: usize = 4;

/// Query-side engine: embeds the query, delegates to the store's indexed
/// queries and, for hybrid mode, merges the two signals into one ranking.
pub struct RankingEngine<C> {
    gateway: EmbeddingGateway<C>,
    store: Arc<dyn SectionStore>,
}

impl<C: EmbeddingClient> RankingEngine<C> {
    pub fn new(gateway: EmbeddingGateway<C>, store: Arc<dyn SectionStore>) -> Self {
        Self { gateway, store }
    }

    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        config: &SearchConfig,
    ) -> Result<Vec<SearchMatch>, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        let results = match mode {
            SearchMode::Vector => self.search_vector(query, config).await?,
            SearchMode::Lexical => self.search_lexical(query, config).await?,
            SearchMode::Hybrid => self.search_hybrid(query, config).await?,
        };

        debug!(
            mode = mode.as_str(),
            results = results.len(),
            "search complete"
        );
        Ok(results)
    }

    async fn search_vector(
        &self,
        query: &str,
        config: &SearchConfig,
    ) -> Result<Vec<SearchMatch>, SearchError> {
        let embedding = self.gateway.embed(query).await?;
        let hits = self
            .store
            .query_vector(&embedding, config.similarity_threshold, config.limit)
            .await?;
        Ok(hits.into_iter().map(SearchMatch::Vector).collect())
    }

    async fn search_lexical(
        &self,
        query: &str,
        config: &SearchConfig,
    ) -> Result<Vec<SearchMatch>, SearchError> {
        let hits = self.store.query_lexical(query, config.limit).await?;
        Ok(hits.into_iter().map(SearchMatch::Lexical).collect())
    }

    /// Union of the vector and lexical candidate sets. A section found by
    /// only one signal scores zero on the other, so it stays in the ranking
    /// instead of being dropped. The vector candidates are fetched
    /// unfiltered: a below-threshold similarity still contributes to the
    /// combined score.
    async fn search_hybrid(
        &self,
        query: &str,
        config: &SearchConfig,
    ) -> Result<Vec<SearchMatch>, SearchError> {
        let candidates = config.limit.max(1) * CANDIDATE_FACTOR;

        let embedding = self.gateway.embed(query).await?;
        let vector_hits = self.store.query_vector(&embedding, -1.0, candidates).await?;
        let lexical_hits = self.store.query_lexical(query, candidates).await?;

        let mut merged: Vec<HybridMatch> = vector_hits
            .into_iter()
            .map(|hit| HybridMatch {
                section: hit.section,
                vector_similarity: hit.similarity,
                text_rank: 0.0,
                combined_score: 0.0,
            })
            .collect();

        for hit in lexical_hits {
            match merged
                .iter_mut()
                .find(|candidate| candidate.section.section_id == hit.section.section_id)
            {
                Some(candidate) => candidate.text_rank = hit.rank,
                None => merged.push(HybridMatch {
                    section: hit.section,
                    vector_similarity: 0.0,
                    text_rank: hit.rank,
                    combined_score: 0.0,
                }),
            }
        }

        // Qualification: a candidate must clear the similarity threshold or
        // match the lexical query. The unfiltered vector fetch exists only
        // so a below-threshold similarity can contribute to a lexically
        // matched chunk's score, not to admit chunks on its own.
        merged.retain(|candidate| {
            candidate.vector_similarity > config.similarity_threshold
                || candidate.text_rank > 0.0
        });

        for candidate in &mut merged {
            candidate.combined_score = config.vector_weight * candidate.vector_similarity
                + config.text_weight * candidate.text_rank;
        }

        // Vec::sort_by is stable, so equal scores keep candidate order.
        merged.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(Ordering::Equal)
        });
        merged.truncate(config.limit);

        Ok(merged.into_iter().map(SearchMatch::Hybrid).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::error::StoreError;
    use crate::models::{
        Chunk, DocumentMeta, DocumentRecord, LexicalMatch, MatchedSection, VectorMatch,
    };
    use async_trait::async_trait;

    struct UnitClient;

    #[async_trait]
    impl EmbeddingClient for UnitClient {
        fn model_name(&self) -> &str {
            "unit"
        }

        fn dimensions(&self) -> usize {
            3
        }

        async fn create_embedding(
            &self,
            _text: &str,
        ) -> Result<Vec<f32>, crate::error::EmbeddingError> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    /// Store scripted with fixed answers for both query paths.
    struct ScriptedStore {
        vector: Vec<VectorMatch>,
        lexical: Vec<LexicalMatch>,
    }

    #[async_trait]
    impl SectionStore for ScriptedStore {
        async fn insert_document(&self, _meta: &DocumentMeta) -> Result<String, StoreError> {
            unimplemented!("query-only fake")
        }

        async fn insert_section(
            &self,
            _document_id: &str,
            _chunk: &Chunk,
            _embedding: &[f32],
        ) -> Result<(), StoreError> {
            unimplemented!("query-only fake")
        }

        async fn query_vector(
            &self,
            _embedding: &[f32],
            threshold: f32,
            limit: usize,
        ) -> Result<Vec<VectorMatch>, StoreError> {
            let mut hits: Vec<VectorMatch> = self
                .vector
                .iter()
                .filter(|hit| hit.similarity > threshold)
                .cloned()
                .collect();
            hits.truncate(limit);
            Ok(hits)
        }

        async fn query_lexical(
            &self,
            _text: &str,
            limit: usize,
        ) -> Result<Vec<LexicalMatch>, StoreError> {
            let mut hits = self.lexical.clone();
            hits.truncate(limit);
            Ok(hits)
        }

        async fn list_documents(&self) -> Result<Vec<DocumentRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn delete_document(&self, _document_id: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn section(id: &str) -> MatchedSection {
        MatchedSection {
            section_id: id.to_string(),
            document_id: "d1".to_string(),
            document_name: "doc".to_string(),
            document_source: "pdf".to_string(),
            document_types: Vec::new(),
            document_authors: None,
            document_published_year: None,
            content: format!("content of {id}"),
            token_count: 100,
        }
    }

    fn engine(store: ScriptedStore) -> RankingEngine<UnitClient> {
        let config = EmbeddingConfig {
            dimensions: 3,
            ..EmbeddingConfig::default()
        };
        RankingEngine::new(
            EmbeddingGateway::new(UnitClient, &config),
            Arc::new(store),
        )
    }

    fn search_config() -> SearchConfig {
        SearchConfig::default()
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let store = ScriptedStore {
            vector: Vec::new(),
            lexical: Vec::new(),
        };
        let result = engine(store)
            .search("   ", SearchMode::Vector, &search_config())
            .await;
        assert!(matches!(result, Err(SearchError::EmptyQuery)));
    }

    #[tokio::test]
    async fn vector_mode_applies_threshold_and_orders_descending() {
        let store = ScriptedStore {
            vector: vec![
                VectorMatch {
                    section: section("s1"),
                    similarity: 0.55,
                },
                VectorMatch {
                    section: section("s2"),
                    similarity: 0.42,
                },
            ],
            lexical: Vec::new(),
        };
        let hits = engine(store)
            .search("presence", SearchMode::Vector, &search_config())
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert!(hits[0].score() > hits[1].score());
        assert_eq!(hits[0].section().section_id, "s1");
    }

    #[tokio::test]
    async fn vector_mode_with_high_threshold_is_empty() {
        let store = ScriptedStore {
            vector: vec![
                VectorMatch {
                    section: section("s1"),
                    similarity: 0.55,
                },
                VectorMatch {
                    section: section("s2"),
                    similarity: 0.42,
                },
            ],
            lexical: Vec::new(),
        };
        let config = SearchConfig {
            similarity_threshold: 0.6,
            ..SearchConfig::default()
        };
        let hits = engine(store)
            .search("presence", SearchMode::Vector, &config)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn hybrid_unions_both_signals() {
        // A: strong vector, absent from lexical. B: weak vector, strong
        // lexical. Weights 0.7/0.3 give A 0.35 and B 0.34.
        let store = ScriptedStore {
            vector: vec![
                VectorMatch {
                    section: section("a"),
                    similarity: 0.5,
                },
                VectorMatch {
                    section: section("b"),
                    similarity: 0.1,
                },
            ],
            lexical: vec![LexicalMatch {
                section: section("b"),
                rank: 0.9,
            }],
        };
        let hits = engine(store)
            .search("presence", SearchMode::Hybrid, &search_config())
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].section().section_id, "a");
        assert!((hits[0].score() - 0.35).abs() < 1e-6);
        assert_eq!(hits[1].section().section_id, "b");
        assert!((hits[1].score() - 0.34).abs() < 1e-6);
    }

    #[tokio::test]
    async fn hybrid_keeps_lexical_only_sections() {
        let store = ScriptedStore {
            vector: Vec::new(),
            lexical: vec![LexicalMatch {
                section: section("only-text"),
                rank: 0.8,
            }],
        };
        let hits = engine(store)
            .search("presence", SearchMode::Hybrid, &search_config())
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert!((hits[0].score() - 0.24).abs() < 1e-6);
    }

    #[tokio::test]
    async fn hybrid_excludes_chunks_qualifying_on_neither_signal() {
        let store = ScriptedStore {
            vector: vec![VectorMatch {
                section: section("noise"),
                similarity: 0.1,
            }],
            lexical: Vec::new(),
        };
        let hits = engine(store)
            .search("presence", SearchMode::Hybrid, &search_config())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn unqualified_chunk_cannot_displace_qualifiers() {
        // 0.39 * 0.7 = 0.273 would outscore the lexical-only 0.15, but the
        // sub-threshold, non-matching chunk must not enter the ranking.
        let store = ScriptedStore {
            vector: vec![
                VectorMatch {
                    section: section("noise"),
                    similarity: 0.39,
                },
                VectorMatch {
                    section: section("strong"),
                    similarity: 0.5,
                },
            ],
            lexical: vec![LexicalMatch {
                section: section("matched"),
                rank: 0.5,
            }],
        };
        let config = SearchConfig {
            limit: 2,
            ..SearchConfig::default()
        };
        let hits = engine(store)
            .search("presence", SearchMode::Hybrid, &config)
            .await
            .unwrap();

        let ids: Vec<&str> = hits
            .iter()
            .map(|hit| hit.section().section_id.as_str())
            .collect();
        assert_eq!(ids, vec!["strong", "matched"]);
    }

    #[tokio::test]
    async fn hybrid_with_full_vector_weight_matches_vector_ordering() {
        let store = ScriptedStore {
            vector: vec![
                VectorMatch {
                    section: section("s1"),
                    similarity: 0.9,
                },
                VectorMatch {
                    section: section("s2"),
                    similarity: 0.3,
                },
            ],
            lexical: vec![LexicalMatch {
                section: section("s2"),
                rank: 1.0,
            }],
        };
        let config = SearchConfig {
            vector_weight: 1.0,
            text_weight: 0.0,
            ..SearchConfig::default()
        };
        let hits = engine(store)
            .search("presence", SearchMode::Hybrid, &config)
            .await
            .unwrap();

        assert_eq!(hits[0].section().section_id, "s1");
        assert_eq!(hits[1].section().section_id, "s2");
    }

    #[tokio::test]
    async fn hybrid_truncates_to_limit() {
        let vector = (0..10)
            .map(|i| VectorMatch {
                section: section(&format!("s{i}")),
                similarity: 1.0 - i as f32 * 0.05,
            })
            .collect();
        let store = ScriptedStore {
            vector,
            lexical: Vec::new(),
        };
        let config = SearchConfig {
            limit: 3,
            ..SearchConfig::default()
        };
        let hits = engine(store)
            .search("presence", SearchMode::Hybrid, &config)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn lexical_mode_passes_through_store_ranking() {
        let store = ScriptedStore {
            vector: Vec::new(),
            lexical: vec![
                LexicalMatch {
                    section: section("s1"),
                    rank: 0.7,
                },
                LexicalMatch {
                    section: section("s2"),
                    rank: 0.2,
                },
            ],
        };
        let hits = engine(store)
            .search("presence", SearchMode::Lexical, &search_config())
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].section().section_id, "s1");
    }
}
