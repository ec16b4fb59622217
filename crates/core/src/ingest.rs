use crate::chunker::{ChunkNormalizer, SkippedSection};
use crate::config::{PipelineConfig, RetryPolicy};
use crate::converter::DocumentConverter;
use crate::embeddings::{EmbeddingClient, EmbeddingGateway};
use crate::enrich::MetadataEnricher;
use crate::error::{EmbeddingError, IngestError, StoreError};
use crate::filter::ContentFilter;
use crate::models::{Chunk, DocumentMeta, RawSection};
use crate::store::SectionStore;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Opening-content sample handed to the metadata enricher.
const ENRICHMENT_SAMPLE_CHARS: usize = 6000;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Cooperative cancellation handle shared between the caller and the
/// pipeline. Once set, no new chunks are dispatched; in-flight work
/// completes and is recorded.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A chunk that could not be embedded or stored; the rest of the document
/// is unaffected.
#[derive(Debug)]
pub struct ChunkFailure {
    pub position: u64,
    pub error: String,
}

#[derive(Debug)]
pub struct DocumentReport {
    pub document_id: String,
    pub document_name: String,
    pub checksum: String,
    pub chunks_emitted: usize,
    pub sections_stored: usize,
    pub skipped_sections: Vec<SkippedSection>,
    pub failed_chunks: Vec<ChunkFailure>,
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug)]
pub struct BatchReport {
    pub run_id: String,
    pub outcomes: Vec<DocumentReport>,
    pub skipped_files: Vec<SkippedFile>,
}

/// Per-document ingestion: convert, filter, normalize, then embed and store
/// each chunk. Chunk boundaries are computed sequentially; embedding and
/// insertion of independent chunks run concurrently under a bounded worker
/// pool.
pub struct IngestionPipeline<C> {
    gateway: Arc<EmbeddingGateway<C>>,
    store: Arc<dyn SectionStore>,
    converter: Box<dyn DocumentConverter>,
    enricher: Box<dyn MetadataEnricher>,
    filter: ContentFilter,
    config: PipelineConfig,
}

impl<C: EmbeddingClient + 'static> IngestionPipeline<C> {
    pub fn new(
        gateway: EmbeddingGateway<C>,
        store: Arc<dyn SectionStore>,
        converter: Box<dyn DocumentConverter>,
        enricher: Box<dyn MetadataEnricher>,
        config: PipelineConfig,
    ) -> Result<Self, IngestError> {
        config.chunking.validate()?;
        Ok(Self {
            gateway: Arc::new(gateway),
            store,
            converter,
            enricher,
            filter: ContentFilter::new(),
            config,
        })
    }

    /// Ingest one document. Fragment failures are recorded in the report;
    /// only document-level failures (unreadable input, metadata insert) and
    /// non-retryable embedding rejections become errors.
    pub async fn process_document(
        &self,
        path: &Path,
        enrich_metadata: bool,
        cancel: &CancelFlag,
    ) -> Result<DocumentReport, IngestError> {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled { completed: 0 });
        }

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
            .to_string();
        let checksum = digest_file(path)?;
        let sections = self.converter.convert(path)?;

        let (kept, mut skipped_sections) = self.filter_sections(sections);
        let normalized = ChunkNormalizer::new(self.config.chunking).normalize(&kept);
        skipped_sections.extend(normalized.skipped);

        let meta = self
            .document_meta(&file_name, &kept, enrich_metadata)
            .await?;
        let document_id = self.store.insert_document(&meta).await?;

        info!(
            document = %meta.name,
            chunks = normalized.chunks.len(),
            "storing document sections"
        );

        let chunks_emitted = normalized.chunks.len();
        let outcome = self.store_chunks(&document_id, normalized.chunks, cancel).await;

        if let Some(rejection) = outcome.rejection {
            warn!(document = %meta.name, error = %rejection, "embedding service rejected the request");
            return Err(rejection);
        }

        Ok(DocumentReport {
            document_id,
            document_name: meta.name,
            checksum,
            chunks_emitted,
            sections_stored: outcome.stored,
            skipped_sections,
            failed_chunks: outcome.failed,
            cancelled: outcome.cancelled,
        })
    }

    /// Ingest every PDF under a folder, sequentially and with per-document
    /// isolation. A document that fails is reported and skipped; only a
    /// non-retryable embedding rejection aborts the whole batch, since every
    /// remaining document would hit the same wall.
    pub async fn process_batch(
        &self,
        folder: &Path,
        enrich_metadata: bool,
        cancel: &CancelFlag,
    ) -> Result<BatchReport, IngestError> {
        let files = discover_pdf_files(folder);
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        let run_id = Uuid::new_v4().to_string();
        let mut outcomes = Vec::new();
        let mut skipped_files = Vec::new();

        for path in files {
            if cancel.is_cancelled() {
                skipped_files.push(SkippedFile {
                    path,
                    reason: "cancelled".to_string(),
                });
                continue;
            }

            match self.process_document(&path, enrich_metadata, cancel).await {
                Ok(report) => outcomes.push(report),
                Err(error @ IngestError::Embedding(EmbeddingError::Rejected { .. })) => {
                    return Err(error);
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping document");
                    skipped_files.push(SkippedFile {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(BatchReport {
            run_id,
            outcomes,
            skipped_files,
        })
    }

    /// Headings pass through unconditionally; body sections must clear the
    /// content filter.
    fn filter_sections(
        &self,
        sections: Vec<RawSection>,
    ) -> (Vec<RawSection>, Vec<SkippedSection>) {
        let mut kept = Vec::new();
        let mut skipped = Vec::new();

        for section in sections {
            if section.heading_level.is_some() || self.filter.is_meaningful(&section.text) {
                kept.push(section);
            } else {
                skipped.push(SkippedSection {
                    index: section.index,
                    reason: "filtered as non-meaningful".to_string(),
                });
            }
        }

        (kept, skipped)
    }

    async fn document_meta(
        &self,
        file_name: &str,
        sections: &[RawSection],
        enrich_metadata: bool,
    ) -> Result<DocumentMeta, IngestError> {
        if !enrich_metadata {
            return Ok(DocumentMeta::from_file_name(file_name));
        }

        let mut sample = String::new();
        for section in sections {
            if sample.len() >= ENRICHMENT_SAMPLE_CHARS {
                break;
            }
            sample.push_str(&section.text);
            sample.push('\n');
        }

        self.enricher.enrich(file_name, &sample).await
    }

    async fn store_chunks(
        &self,
        document_id: &str,
        chunks: Vec<Chunk>,
        cancel: &CancelFlag,
    ) -> ChunkOutcome {
        let semaphore = Arc::new(Semaphore::new(self.config.embed_workers()));
        let mut tasks = JoinSet::new();
        let mut outcome = ChunkOutcome::default();

        for chunk in chunks {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let gateway = Arc::clone(&self.gateway);
            let store = Arc::clone(&self.store);
            let document_id = document_id.to_string();
            let retry = self.config.retry;
            let timeout = self.config.embedding.timeout;

            tasks.spawn(async move {
                let _permit = permit;
                let position = chunk.source_order;
                let result =
                    embed_and_store(&gateway, &*store, &document_id, &chunk, retry, timeout)
                        .await;
                (position, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => outcome.stored += 1,
                Ok((position, Err(error))) => {
                    warn!(position, %error, "chunk failed");
                    if matches!(
                        error,
                        IngestError::Embedding(EmbeddingError::Rejected { .. })
                    ) && outcome.rejection.is_none()
                    {
                        outcome.rejection = Some(error);
                    } else {
                        outcome.failed.push(ChunkFailure {
                            position,
                            error: error.to_string(),
                        });
                    }
                }
                Err(join_error) => outcome.failed.push(ChunkFailure {
                    position: u64::MAX,
                    error: join_error.to_string(),
                }),
            }
        }

        outcome.failed.sort_by_key(|failure| failure.position);
        outcome
    }
}

#[derive(Default)]
struct ChunkOutcome {
    stored: usize,
    failed: Vec<ChunkFailure>,
    cancelled: bool,
    /// First non-retryable rejection seen; escalated to abort the document
    /// and the surrounding batch.
    rejection: Option<IngestError>,
}

/// Embed one chunk and insert it, retrying transient failures with the
/// caller's backoff policy. Each attempt is bounded by the embedding
/// timeout.
async fn embed_and_store<C: EmbeddingClient>(
    gateway: &EmbeddingGateway<C>,
    store: &dyn SectionStore,
    document_id: &str,
    chunk: &Chunk,
    retry: RetryPolicy,
    timeout: Duration,
) -> Result<(), IngestError> {
    let mut attempt = 1u32;
    loop {
        let result = attempt_chunk(gateway, store, document_id, chunk, timeout).await;
        match result {
            Ok(()) => return Ok(()),
            Err(error) if is_retryable(&error) && attempt < retry.max_attempts => {
                warn!(
                    position = chunk.source_order,
                    attempt,
                    %error,
                    "transient chunk failure, backing off"
                );
                tokio::time::sleep(retry.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

async fn attempt_chunk<C: EmbeddingClient>(
    gateway: &EmbeddingGateway<C>,
    store: &dyn SectionStore,
    document_id: &str,
    chunk: &Chunk,
    timeout: Duration,
) -> Result<(), IngestError> {
    let embedding = tokio::time::timeout(timeout, gateway.embed(&chunk.content))
        .await
        .map_err(|_| EmbeddingError::Transient("embedding call timed out".to_string()))??;

    tokio::time::timeout(timeout, store.insert_section(document_id, chunk, &embedding))
        .await
        .map_err(|_| StoreError::Timeout)??;

    Ok(())
}

fn is_retryable(error: &IngestError) -> bool {
    match error {
        IngestError::Embedding(embedding) => embedding.is_transient(),
        IngestError::Store(StoreError::Timeout) => true,
        _ => false,
    }
}
