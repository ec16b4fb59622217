use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_rag_core::{
    BatchReport, CancelFlag, DocumentReport, EmbeddingConfig, EmbeddingGateway, FilenameEnricher,
    IngestionPipeline, LopdfConverter, MetadataEnricher, OpenAiEmbeddingClient, OpenAiEnricher,
    PipelineConfig, RankingEngine, SearchConfig, SearchMatch, SearchMode, SectionStore,
    SupabaseStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Supabase project URL
    #[arg(long, env = "SUPABASE_URL")]
    supabase_url: String,

    /// Supabase service role key
    #[arg(long, env = "SUPABASE_SERVICE_KEY", hide_env_values = true)]
    supabase_key: String,

    /// OpenAI API key, required for ingestion and vector/hybrid queries
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: String,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a single PDF: chunk, embed and store its sections.
    Process {
        /// Path to the PDF file.
        pdf: PathBuf,
        /// Skip chat-model metadata enrichment; derive metadata from the
        /// file name instead.
        #[arg(long, default_value_t = false)]
        no_metadata: bool,
    },
    /// Ingest every PDF under a folder, recursively.
    Batch {
        /// Folder that contains PDFs.
        folder: PathBuf,
        #[arg(long, default_value_t = false)]
        no_metadata: bool,
    },
    /// Search stored sections.
    Query {
        /// Natural-language query text.
        text: String,
        /// Search mode.
        #[arg(long, value_enum, default_value_t = Mode::Hybrid)]
        mode: Mode,
        /// Maximum number of results.
        #[arg(long, default_value = "5")]
        limit: usize,
        /// Minimum cosine similarity for vector mode.
        #[arg(long, default_value = "0.4")]
        threshold: f32,
        /// Vector signal weight in hybrid mode.
        #[arg(long, default_value = "0.7")]
        vector_weight: f32,
        /// Text signal weight in hybrid mode.
        #[arg(long, default_value = "0.3")]
        text_weight: f32,
    },
    /// List stored documents.
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Vector,
    Text,
    Hybrid,
}

impl From<Mode> for SearchMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Vector => SearchMode::Vector,
            Mode::Text => SearchMode::Lexical,
            Mode::Hybrid => SearchMode::Hybrid,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let embedding_config = EmbeddingConfig::default();
    let store: Arc<dyn SectionStore> = Arc::new(SupabaseStore::new(
        &cli.supabase_url,
        cli.supabase_key.as_str(),
        embedding_config.timeout,
    )?);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    match cli.command {
        Command::Process { pdf, no_metadata } => {
            let pipeline = build_pipeline(&cli.openai_api_key, store, no_metadata)?;
            let cancel = cancel_on_ctrl_c();
            let report = pipeline
                .process_document(&pdf, !no_metadata, &cancel)
                .await?;
            print_document_report(&report);
        }
        Command::Batch {
            folder,
            no_metadata,
        } => {
            let pipeline = build_pipeline(&cli.openai_api_key, store, no_metadata)?;
            let cancel = cancel_on_ctrl_c();
            let report = pipeline
                .process_batch(&folder, !no_metadata, &cancel)
                .await?;
            print_batch_report(&report);
        }
        Command::Query {
            text,
            mode,
            limit,
            threshold,
            vector_weight,
            text_weight,
        } => {
            let client = OpenAiEmbeddingClient::new(cli.openai_api_key.as_str(), &embedding_config)?;
            let engine = RankingEngine::new(
                EmbeddingGateway::new(client, &embedding_config),
                store,
            );
            let config = SearchConfig {
                limit,
                similarity_threshold: threshold,
                vector_weight,
                text_weight,
            };

            let hits = engine.search(&text, mode.into(), &config).await?;
            print_search_results(&text, &hits);
        }
        Command::List => {
            let documents = store.list_documents().await?;
            if documents.is_empty() {
                println!("no documents stored");
            }
            for document in documents {
                let year = document
                    .published_year
                    .map(|year| year.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "[{}] {} | source={} | types={} | authors={} | year={}",
                    document.id,
                    document.name,
                    document.source,
                    document.doc_types.join(", "),
                    document.authors.as_deref().unwrap_or("-"),
                    year,
                );
            }
        }
    }

    Ok(())
}

fn build_pipeline(
    api_key: &str,
    store: Arc<dyn SectionStore>,
    no_metadata: bool,
) -> anyhow::Result<IngestionPipeline<OpenAiEmbeddingClient>> {
    let config = PipelineConfig::default();
    let client = OpenAiEmbeddingClient::new(api_key, &config.embedding)?;
    let enricher: Box<dyn MetadataEnricher> = if no_metadata {
        Box::new(FilenameEnricher)
    } else {
        Box::new(OpenAiEnricher::new(api_key, config.embedding.timeout)?)
    };

    let pipeline = IngestionPipeline::new(
        EmbeddingGateway::new(client, &config.embedding),
        store,
        Box::new(LopdfConverter),
        enricher,
        config,
    )?;
    Ok(pipeline)
}

fn cancel_on_ctrl_c() -> CancelFlag {
    let cancel = CancelFlag::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight chunks");
            handle.cancel();
        }
    });
    cancel
}

fn print_document_report(report: &DocumentReport) {
    println!(
        "{}: {}/{} chunks stored (checksum {})",
        report.document_name,
        report.sections_stored,
        report.chunks_emitted,
        &report.checksum[..12.min(report.checksum.len())],
    );
    for skipped in &report.skipped_sections {
        println!("  skipped section {}: {}", skipped.index, skipped.reason);
    }
    for failure in &report.failed_chunks {
        println!("  failed chunk {}: {}", failure.position, failure.error);
    }
    if report.cancelled {
        println!("  cancelled before completion");
    }
}

fn print_batch_report(report: &BatchReport) {
    println!("batch run {}", report.run_id);
    for outcome in &report.outcomes {
        print_document_report(outcome);
    }
    for skipped in &report.skipped_files {
        println!("skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    println!(
        "{} documents ingested, {} skipped",
        report.outcomes.len(),
        report.skipped_files.len()
    );
}

fn print_search_results(query: &str, hits: &[SearchMatch]) {
    println!("query: {query}");
    if hits.is_empty() {
        println!("no results");
        return;
    }

    for (position, hit) in hits.iter().enumerate() {
        let section = hit.section();
        println!(
            "{}. {} ({} tokens)",
            position + 1,
            section.document_name,
            section.token_count
        );
        if let Some(authors) = &section.document_authors {
            println!("   authors: {authors}");
        }
        match hit {
            SearchMatch::Vector(vector) => {
                println!("   similarity: {:.4}", vector.similarity)
            }
            SearchMatch::Lexical(lexical) => println!("   rank: {:.4}", lexical.rank),
            SearchMatch::Hybrid(hybrid) => println!(
                "   combined: {:.4} (similarity {:.4}, rank {:.4})",
                hybrid.combined_score, hybrid.vector_similarity, hybrid.text_rank
            ),
        }
        println!("   {}", preview(&section.content, 300));
    }
}

fn preview(text: &str, limit: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flattened.char_indices().nth(limit) {
        Some((offset, _)) => format!("{}...", &flattened[..offset]),
        None => flattened,
    }
}
