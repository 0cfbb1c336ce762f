mod config;

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use ragline_agent::{format_sources, LlmClient, RagOrchestrator, RagSettings};
use ragline_core::{ArticleId, FusionMethod, RagError, SearchResult, SnowflakeGenerator, Stage};
use ragline_memory::{
    group_by_article, known_models, load_documents, rank_groups, supported_models,
    vector_size_or_probe, CollectionGateway, EmbeddingFormatter, EmbeddingProvider,
    HybridSearcher, IndexingOptions, IndexingPipeline, OllamaEmbedding, QdrantStore,
    SearchRequest, VectorStore,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::RaglineConfig;

const DEFAULT_CONFIG: &str = "ragline.toml";

#[derive(Parser)]
#[command(name = "ragline", about = "ragline: hybrid-search RAG over Qdrant and Ollama")]
struct Cli {
    /// Path to config file [default: ragline.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Collection to use (overrides config)
    #[arg(long, global = true)]
    collection: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk, embed and index documents from a JSON array file
    Index {
        /// JSON file with `id`/`article_id`, `title`, `content` objects
        file: PathBuf,
        /// Drop and recreate the collection first
        #[arg(long)]
        recreate: bool,
        /// Validate and chunk only
        #[arg(long)]
        dry_run: bool,
        /// Words per chunk (overrides config)
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Words shared by consecutive chunks (overrides config)
        #[arg(long)]
        overlap: Option<usize>,
        /// Chunk cap per document (overrides config)
        #[arg(long)]
        max_chunks: Option<usize>,
        /// Texts per embedding batch (overrides config)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Search the collection
    Search {
        query: String,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        min_score: Option<f32>,
        /// `rrf` or `dbsf`
        #[arg(long)]
        fusion: Option<FusionMethod>,
        /// Vector search only
        #[arg(long)]
        simple: bool,
        /// Restrict to one article
        #[arg(long)]
        article: Option<String>,
        /// Group hits by article
        #[arg(long)]
        group: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show every chunk of one article
    Article {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Find chunks similar to a stored chunk
    Similar {
        point_id: u64,
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Collection statistics
    Stats,
    /// Answer a question from the indexed documents
    Ask {
        question: String,
        /// Wait for the whole answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// List embedding models
    Models,
    /// Check the embedding provider and the vector store
    Health,
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Numeric ids become integers, everything else stays text.
fn parse_article_id(raw: &str) -> ArticleId {
    raw.trim()
        .parse::<i64>()
        .map(ArticleId::Int)
        .unwrap_or_else(|_| ArticleId::Text(raw.trim().to_string()))
}

/// Shared service handles, built once per invocation.
struct App {
    config: RaglineConfig,
    embedder: Arc<OllamaEmbedding>,
    store: Arc<QdrantStore>,
}

impl App {
    fn new(config: RaglineConfig) -> anyhow::Result<Self> {
        let embedder = Arc::new(OllamaEmbedding::from_config(&config.embedding)?);
        let store = Arc::new(QdrantStore::from_config(&config.store)?);
        Ok(Self {
            config,
            embedder,
            store,
        })
    }

    fn collection(&self) -> &str {
        &self.config.store.collection
    }

    async fn query_vector(&self, query: &str) -> anyhow::Result<Vec<f32>> {
        let model = &self.config.embedding.model;
        let formatted =
            EmbeddingFormatter::new().format_query(query, model, &self.config.embedding.task_type);
        self.embedder
            .embed(&formatted, model)
            .await
            .map_err(|e| e.in_stage(Stage::Embedding))
            .with_context(|| format!("embedding query with model '{model}'"))
    }
}

/// Renders a top-level failure. When a pipeline error is in the chain the
/// message leads with its stage, followed by every context layer (the input
/// that was being processed) and the cause.
fn render_error(err: &anyhow::Error) -> String {
    let mut parts = Vec::new();
    let mut stage = None;
    for cause in err.chain() {
        parts.push(cause.to_string());
        // A pipeline error's message already includes its own source.
        if let Some(rag) = cause.downcast_ref::<RagError>() {
            stage = Some(rag.stage());
            break;
        }
    }
    let chain = parts.join(": ");
    match stage {
        Some(stage) => format!("{stage} failed: {chain}"),
        None => chain,
    }
}

fn print_hits(results: &[SearchResult]) {
    for (rank, r) in results.iter().enumerate() {
        let preview: String = r.payload.content.chars().take(160).collect();
        println!(
            "{:>2}. [{:.4}] {} (article {}, chunk {}, point {})",
            rank + 1,
            r.score,
            r.payload.title,
            r.payload.article_id,
            r.payload.chunk_index,
            r.id
        );
        println!("    {preview}");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let dotenv = dotenvy::dotenv();
    init_tracing(cli.log_json);
    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!(error = %e, "Failed to read .env file");
        }
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", render_error(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let (path, required) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG), false),
    };
    let mut config = RaglineConfig::load(&path, required)?;
    config.apply_env(|name| std::env::var(name).ok());
    if let Some(collection) = cli.collection {
        config.store.collection = collection;
    }

    match cli.command {
        Commands::Index {
            file,
            recreate,
            dry_run,
            chunk_size,
            overlap,
            max_chunks,
            batch_size,
        } => {
            let indexing = &mut config.indexing;
            indexing.recreate |= recreate;
            if let Some(v) = chunk_size {
                indexing.chunk_size = v;
            }
            if let Some(v) = overlap {
                indexing.chunk_overlap = v;
            }
            if let Some(v) = max_chunks {
                indexing.max_chunks_per_article = v;
            }
            if let Some(v) = batch_size {
                indexing.embedding_batch_size = v;
            }
            config.validate()?;

            let app = App::new(config)?;
            let documents = load_documents(&file)
                .await
                .with_context(|| format!("reading documents from '{}'", file.display()))?;
            info!(file = %file.display(), documents = documents.len(), "Loaded documents");

            let options = IndexingOptions::from_config(&app.config.indexing, &app.config.embedding)
                .with_distance(app.config.store.distance)
                .with_dry_run(dry_run);
            let pipeline = IndexingPipeline::new(
                app.embedder.clone(),
                Arc::new(CollectionGateway::new(app.store.clone())),
                Arc::new(SnowflakeGenerator::default()),
            );
            let report = pipeline
                .index(app.collection(), &documents, &options)
                .await
                .with_context(|| format!("indexing into collection '{}'", app.collection()))?;

            println!("Articles processed: {}", report.articles_processed);
            println!("Articles skipped:   {}", report.articles_skipped);
            println!("Chunks created:     {}", report.chunks_created);
            println!("Chunks indexed:     {}", report.chunks_indexed);
            if report.batches_failed > 0 || report.points_failed > 0 {
                println!(
                    "Failures:           {} batch(es), {} point(s)",
                    report.batches_failed, report.points_failed
                );
            }
            if let Some(size) = report.vector_size {
                println!("Vector size:        {size}");
            }
        }
        Commands::Search {
            query,
            limit,
            min_score,
            fusion,
            simple,
            article,
            group,
            json,
        } => {
            config.validate()?;
            let app = App::new(config)?;
            let search = &app.config.search;

            let vector = app.query_vector(&query).await?;
            let mut request = SearchRequest::new(vector, limit.unwrap_or(search.limit))
                .with_text(query.as_str())
                .with_min_score(min_score.unwrap_or(search.min_score))
                .with_fusion(fusion.unwrap_or(search.fusion));
            if let Some(id) = article.as_deref() {
                request = request.within_article(parse_article_id(id));
            }

            let searcher = HybridSearcher::new(app.store.clone());
            let results = if simple || !search.hybrid {
                searcher.search_simple(app.collection(), &request).await
            } else {
                searcher.search_hybrid(app.collection(), &request).await
            }
            .map_err(|e| e.in_stage(Stage::Searching))
            .with_context(|| format!("searching collection '{}'", app.collection()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results.");
            } else if group {
                for (article_id, members) in rank_groups(group_by_article(&results)) {
                    println!("Article {article_id}:");
                    print_hits(&members);
                }
            } else {
                print_hits(&results);
            }
        }
        Commands::Article { id, json } => {
            config.validate()?;
            let app = App::new(config)?;
            let searcher = HybridSearcher::new(app.store.clone());
            let chunks = searcher
                .get_article(app.collection(), &parse_article_id(&id))
                .await
                .map_err(|e| e.in_stage(Stage::Searching))
                .with_context(|| {
                    format!("fetching article '{id}' from collection '{}'", app.collection())
                })?;

            if json {
                println!("{}", serde_json::to_string_pretty(&chunks)?);
            } else if chunks.is_empty() {
                println!("Article '{id}' not found.");
            } else {
                println!("# {}\n", chunks[0].payload.title);
                for chunk in &chunks {
                    println!("[chunk {}] {}\n", chunk.payload.chunk_index, chunk.payload.content);
                }
            }
        }
        Commands::Similar { point_id, limit } => {
            config.validate()?;
            let app = App::new(config)?;
            let searcher = HybridSearcher::new(app.store.clone());
            let results = searcher
                .find_similar(app.collection(), point_id, limit)
                .await
                .map_err(|e| e.in_stage(Stage::Searching))
                .with_context(|| {
                    format!("finding chunks similar to point {point_id} in '{}'", app.collection())
                })?;
            if results.is_empty() {
                println!("No similar chunks for point {point_id}.");
            } else {
                print_hits(&results);
            }
        }
        Commands::Stats => {
            config.validate()?;
            let app = App::new(config)?;
            let gateway = CollectionGateway::new(app.store.clone());
            let stats = gateway
                .get_stats(app.collection())
                .await
                .with_context(|| format!("reading stats of collection '{}'", app.collection()))?;
            let vector_size = gateway
                .vector_size(app.collection())
                .await
                .with_context(|| format!("reading vector size of '{}'", app.collection()))?;
            println!("Collection:  {}", app.collection());
            println!("Status:      {}", stats.status);
            println!("Points:      {}", stats.points_count);
            println!("Vectors:     {}", stats.vectors_count);
            println!("Vector size: {vector_size}");
        }
        Commands::Ask {
            question,
            no_stream,
        } => {
            config.validate()?;
            let settings = RagSettings::from_config(
                &config.store,
                &config.embedding,
                &config.search,
                &config.model,
            );
            let llm = LlmClient::new(config.model.clone())?;
            let app = App::new(config)?;
            let rag = RagOrchestrator::new(app.embedder.clone(), app.store.clone(), llm, settings);

            let sources = if no_stream {
                let answer = rag
                    .answer(&question)
                    .await
                    .with_context(|| format!("answering from collection '{}'", app.collection()))?;
                println!("{}", answer.answer);
                answer.sources
            } else {
                let mut answer = rag
                    .answer_stream(&question)
                    .await
                    .with_context(|| format!("answering from collection '{}'", app.collection()))?;
                let mut stdout = std::io::stdout();
                loop {
                    tokio::select! {
                        fragment = answer.stream.next() => match fragment {
                            Some(text) => {
                                print!("{}", text.context("streaming the answer")?);
                                stdout.flush()?;
                            }
                            None => break,
                        },
                        _ = tokio::signal::ctrl_c() => {
                            warn!("Interrupted, stopping generation");
                            break;
                        }
                    }
                }
                println!();
                answer.sources
            };

            if !sources.is_empty() {
                println!("\nSources:\n{}", format_sources(&sources));
            }
        }
        Commands::Models => {
            config.embedding.validate()?;
            let embedder = OllamaEmbedding::from_config(&config.embedding)?;
            match embedder.list_models().await {
                Ok(models) if !models.is_empty() => {
                    println!("Available on {}:", embedder.base_url());
                    for m in &models {
                        match m.size {
                            Some(size) => println!("  {} ({} MB)", m.name, size / 1_000_000),
                            None => println!("  {}", m.name),
                        }
                    }
                }
                Ok(_) => println!("No models reported by {}.", embedder.base_url()),
                Err(e) => warn!(error = %e, "Could not list provider models"),
            }

            println!("\nKnown embedding models:");
            for m in known_models() {
                let marker = if m.name == config.embedding.model { "*" } else { " " };
                println!(
                    "{marker} {:<45} {:>5} dims  {:<22} max {} tokens",
                    m.name,
                    m.vector_size,
                    m.format().as_str(),
                    m.max_sequence_length
                );
            }

            println!("\nRecognized model name patterns (first match wins):");
            for (pattern, format) in supported_models() {
                println!("  {pattern:<24} {}", format.as_str());
            }
        }
        Commands::Health => {
            config.validate()?;
            let app = App::new(config)?;
            let embedding_ok = app.embedder.health_check().await;
            println!(
                "Embedding provider ({}): {}",
                app.embedder.base_url(),
                if embedding_ok { "ok" } else { "unreachable" }
            );
            if embedding_ok {
                let model = &app.config.embedding.model;
                match vector_size_or_probe(app.embedder.as_ref(), model).await {
                    Ok(size) => println!("Embedding model '{model}': {size} dims"),
                    Err(e) => println!("Embedding model '{model}': {e}"),
                }
            }

            match app.store.collection_info(app.collection()).await {
                Ok(info) => println!(
                    "Vector store: ok (collection '{}' {}, {} points)",
                    app.collection(),
                    info.status,
                    info.points_count
                ),
                Err(e) => println!("Vector store: {e}"),
            }
        }
    }

    Ok(())
}
