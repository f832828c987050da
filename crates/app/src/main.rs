use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use docthemes_core::{
    ingest_paths, ocr_engine, read_document, CharacterNgramEmbedder, Chunker, Config, Embedder,
    Extractor, InMemoryIndex, LanguageModel, OcrEndpointConfig, OpenAiChatModel, OpenAiEmbedder,
    QdrantIndex, ReindexPolicy, Session, ThemeMode, VectorIndex, DEFAULT_MAX_TOKENS,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PREVIEW_CHARS: usize = 500;

#[derive(Parser)]
#[command(name = "docthemes", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Args)]
struct BackendArgs {
    /// Embed with the offline character n-gram embedder instead of the OpenAI API.
    #[arg(long, global = true, default_value_t = false)]
    offline: bool,

    /// Where chunk embeddings are stored.
    #[arg(long, global = true, value_enum, default_value_t = IndexKind::Memory)]
    index: IndexKind,

    /// Qdrant base URL
    #[arg(long, global = true, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, global = true, env = "QDRANT_COLLECTION", default_value = "doc_chunks")]
    qdrant_collection: String,

    /// What to do with a document that already has stored chunks.
    #[arg(long, global = true, value_enum, default_value_t = Reindex::Replace)]
    reindex: Reindex,
}

#[derive(Clone, Copy, ValueEnum)]
enum IndexKind {
    Memory,
    Qdrant,
}

#[derive(Clone, Copy, ValueEnum)]
enum Reindex {
    Replace,
    Skip,
    Append,
}

impl From<Reindex> for ReindexPolicy {
    fn from(value: Reindex) -> Self {
        match value {
            Reindex::Replace => ReindexPolicy::Replace,
            Reindex::Skip => ReindexPolicy::Skip,
            Reindex::Append => ReindexPolicy::Append,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ThemeModeArg {
    /// Ask each document the question itself.
    Question,
    /// Ask each document for its main idea.
    MainIdea,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest documents, answer a question from them and optionally synthesize themes.
    Ask {
        /// Question to answer from the ingested documents.
        #[arg(long)]
        question: String,
        /// Also synthesize recurring themes across documents.
        #[arg(long, default_value_t = false)]
        themes: bool,
        /// Question each document is asked before theme synthesis.
        #[arg(long, value_enum, default_value_t = ThemeModeArg::Question)]
        theme_mode: ThemeModeArg,
        /// Restrict the answer and themes to these document names.
        #[arg(long = "document")]
        documents: Vec<String>,
        /// Override CHUNK_MAX_TOKENS.
        #[arg(long)]
        max_tokens: Option<usize>,
        /// Override RETRIEVAL_TOP_K.
        #[arg(long)]
        top_k: Option<usize>,
        /// PDF or image files, or folders searched recursively.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Print the text extracted from one document.
    Extract { path: PathBuf },
    /// Show how a document's text is split into token-bounded chunks.
    Chunk {
        path: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
        max_tokens: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli { command, backend } = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "docthemes boot"
    );

    match command {
        Command::Extract { path } => extract(&path).await,
        Command::Chunk { path, max_tokens } => chunk(&path, max_tokens).await,
        Command::Ask {
            question,
            themes,
            theme_mode,
            documents,
            max_tokens,
            top_k,
            paths,
        } => {
            let mode = themes.then(|| match theme_mode {
                ThemeModeArg::Question => ThemeMode::Question(question.clone()),
                ThemeModeArg::MainIdea => ThemeMode::MainIdea,
            });
            ask(&backend, &question, mode, &documents, max_tokens, top_k, &paths).await
        }
    }
}

fn standalone_extractor() -> Extractor {
    Extractor::new(ocr_engine(OcrEndpointConfig::from_env().as_ref()))
}

async fn extract(path: &Path) -> anyhow::Result<()> {
    let (name, media_type, bytes) = read_document(path).await?;
    let extraction = standalone_extractor().extract(&bytes, media_type).await;

    if let Some(failure) = extraction.failure() {
        warn!(document = %name, error = %failure, "extraction failed");
    }

    let text = extraction.text();
    println!(
        "{name}: {} characters via {}",
        text.chars().count(),
        extraction.method().as_str()
    );
    if text.trim().is_empty() {
        println!("no text found");
    } else {
        println!("{}", text.chars().take(PREVIEW_CHARS).collect::<String>());
    }
    Ok(())
}

async fn chunk(path: &Path, max_tokens: usize) -> anyhow::Result<()> {
    let (name, media_type, bytes) = read_document(path).await?;
    let text = standalone_extractor().extract_text(&bytes, media_type).await;
    let chunker = Chunker::for_default_model(max_tokens)?;
    let chunks = chunker.chunk(&text);

    println!("{name}: {} chunks (max {max_tokens} tokens)", chunks.len());
    for (index, chunk) in chunks.iter().enumerate() {
        println!(
            "  #{index} tokens={} words={}",
            chunker.chunk_cost(chunk),
            chunk.split_whitespace().count()
        );
    }
    Ok(())
}

async fn ask(
    backend: &BackendArgs,
    question: &str,
    theme_mode: Option<ThemeMode>,
    documents: &[String],
    max_tokens: Option<usize>,
    top_k: Option<usize>,
    paths: &[PathBuf],
) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let mut options = config.pipeline_options(backend.reindex.into());
    if let Some(max_tokens) = max_tokens {
        options.max_tokens = max_tokens;
    }
    if let Some(top_k) = top_k {
        options.top_k = top_k;
    }

    let embedder: Arc<dyn Embedder> = if backend.offline {
        Arc::new(CharacterNgramEmbedder::default())
    } else {
        Arc::new(OpenAiEmbedder::from_config(&config))
    };
    let index: Arc<dyn VectorIndex> = match backend.index {
        IndexKind::Memory => Arc::new(InMemoryIndex::new()),
        IndexKind::Qdrant => Arc::new(QdrantIndex::new(
            &backend.qdrant_url,
            &backend.qdrant_collection,
            embedder.dimensions(),
        )),
    };
    let model: Arc<dyn LanguageModel> = Arc::new(OpenAiChatModel::from_config(&config));

    let mut session = Session::open(
        Extractor::new(ocr_engine(config.ocr.as_ref())),
        Chunker::for_default_model(options.max_tokens)?,
        embedder,
        index,
        model,
        &options,
    )
    .await?;

    let report = ingest_paths(&mut session, paths).await?;
    for outcome in &report.ingested {
        if outcome.has_text() {
            println!(
                "{}: extracted {} characters via {}, {} chunks embedded",
                outcome.document,
                outcome.characters,
                outcome.method.as_str(),
                outcome.chunks_embedded
            );
        } else {
            println!(
                "{}: no text found{}",
                outcome.document,
                outcome
                    .failure
                    .as_deref()
                    .map(|reason| format!(" ({reason})"))
                    .unwrap_or_default()
            );
        }
    }
    if !report.skipped.is_empty() {
        warn!("skipped_documents={}", report.skipped.len());
        for skipped in &report.skipped {
            println!("skipped {}: {}", skipped.path.display(), skipped.reason);
        }
    }
    info!(
        documents = report.ingested.len(),
        chunks = report.chunks_embedded(),
        "ingestion finished"
    );

    let result = if documents.is_empty() {
        session.answer(question).await?
    } else {
        session.answer_scoped(question, documents).await?
    };

    println!("\nAnswer:\n{}", result.answer);
    println!("\nSources referenced:");
    for source in &result.sources {
        let marker = if result.cited.contains(source) { " (cited)" } else { "" };
        println!("- {source}{marker}");
    }

    if let Some(mode) = theme_mode {
        let summary = session.themes(documents, mode).await?;
        println!("\nThemes:\n{}", summary.text);
    }

    session.close().await?;
    Ok(())
}
