use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use steuer_rag_core::{
    build_corpus, cosine_similarity, embed_segments, CharacterNgramEmbedder, Embedder,
    EmbeddingOptions, GenerationOptions, HttpEmbedder, InMemoryIndex, LopdfExtractor,
    OpenAiChatModel, QdrantIndex, RagConfig, RagPipeline, RetrievalOptions, SegmentFile,
    SegmentIndex, SegmentStore, SegmentationOptions, Segmenter, CHARACTER_NGRAM_MODEL,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "steuer-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Base URL of an OpenAI-compatible embeddings server
    #[arg(long, env = "EMBEDDING_URL", default_value = "http://localhost:8080/")]
    embedding_url: String,

    /// API key for the embeddings server, if it needs one
    #[arg(long, env = "EMBEDDING_API_KEY")]
    embedding_api_key: Option<String>,

    /// Use the built-in character n-gram embedder instead of the server
    #[arg(long, default_value_t = false)]
    offline_embeddings: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Split every PDF of a folder into chained segments.
    Segment {
        /// Folder with `<label>_<year>_<month>_<day>.pdf` files.
        #[arg(long, default_value = "data/pdfs")]
        pdf_dir: PathBuf,
        /// Where the segment JSON is written.
        #[arg(long, default_value = "data/segments/segments.json")]
        output: PathBuf,
        /// Chunks with this many characters or fewer are dropped.
        #[arg(long, default_value_t = SegmentationOptions::default().min_chars_per_segment)]
        min_chars: usize,
        /// Longest chunk that still counts as a heading.
        #[arg(long, default_value_t = SegmentationOptions::default().heading_max_chars)]
        heading_max_chars: usize,
    },
    /// Attach embeddings to segments and write the segment store.
    Embed {
        #[arg(long, default_value = "data/segments/segments.json")]
        segments: PathBuf,
        #[arg(long, default_value = "data/segments/segments_with_embeddings.json")]
        output: PathBuf,
        /// Embedding model served by the embeddings server.
        #[arg(long, default_value_t = EmbeddingOptions::default().model)]
        model: String,
        #[arg(long, default_value_t = EmbeddingOptions::default().batch_size)]
        batch_size: usize,
        /// Keep raw vectors instead of L2-normalizing them.
        #[arg(long, default_value_t = false)]
        no_normalize: bool,
    },
    /// Answer questions against the segment store.
    Ask {
        /// Question; repeat for several.
        #[arg(long, required = true)]
        query: Vec<String>,
        #[arg(long, default_value = "data/segments/segments_with_embeddings.json")]
        store: PathBuf,
        #[arg(long, value_enum, default_value_t = Backend::Memory)]
        backend: Backend,
        /// Qdrant base URL
        #[arg(long, default_value = "http://localhost:6333")]
        qdrant_url: String,
        /// Qdrant collection
        #[arg(long, default_value = "segments")]
        qdrant_collection: String,
        #[arg(long, default_value_t = RetrievalOptions::default().document_limit)]
        document_limit: usize,
        /// Start without neighbour context; retries still switch it on.
        #[arg(long, default_value_t = false)]
        no_extra_context: bool,
        #[arg(long, default_value_t = RetrievalOptions::default().max_retries)]
        max_retries: usize,
        #[arg(long, default_value_t = RetrievalOptions::default().doc_limit_increment)]
        doc_limit_increment: usize,
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        openai_api_key: String,
        #[arg(long, env = "OPENAI_BASE_URL", default_value = OpenAiChatModel::DEFAULT_BASE_URL)]
        openai_base_url: String,
        #[arg(long, default_value_t = GenerationOptions::default().model)]
        chat_model: String,
    },
    /// Cosine similarity of two texts under the configured embedder.
    Compare {
        #[arg(long)]
        text_a: String,
        #[arg(long)]
        text_b: String,
        #[arg(long, default_value_t = EmbeddingOptions::default().model)]
        model: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Memory,
    Qdrant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "steuer-rag boot"
    );

    match &cli.command {
        Command::Segment {
            pdf_dir,
            output,
            min_chars,
            heading_max_chars,
        } => {
            let options = SegmentationOptions {
                min_chars_per_segment: *min_chars,
                heading_max_chars: *heading_max_chars,
                ..SegmentationOptions::default()
            };
            segment(pdf_dir, output, options)?;
        }
        Command::Embed {
            segments,
            output,
            model,
            batch_size,
            no_normalize,
        } => {
            let options = EmbeddingOptions {
                model: model.clone(),
                normalize: !no_normalize,
                batch_size: *batch_size,
            };
            embed(&cli, segments, output, options).await?;
        }
        Command::Ask {
            query,
            store,
            backend,
            qdrant_url,
            qdrant_collection,
            document_limit,
            no_extra_context,
            max_retries,
            doc_limit_increment,
            openai_api_key,
            openai_base_url,
            chat_model,
        } => {
            let config = RagConfig {
                retrieval: RetrievalOptions {
                    document_limit: *document_limit,
                    extra_context: !no_extra_context,
                    max_retries: *max_retries,
                    doc_limit_increment: *doc_limit_increment,
                },
                generation: GenerationOptions {
                    model: chat_model.clone(),
                    ..GenerationOptions::default()
                },
                ..RagConfig::default()
            };

            let store = SegmentStore::load(store)
                .with_context(|| format!("loading segment store {}", store.display()))?;
            let embedder = embedder_for(
                &cli,
                &EmbeddingOptions {
                    model: store.embedding_model.clone(),
                    normalize: store.normalized,
                    ..EmbeddingOptions::default()
                },
            )?;
            let model = OpenAiChatModel::new(openai_base_url, openai_api_key, config.generation)?;

            match backend {
                Backend::Memory => {
                    let mut index = InMemoryIndex::new();
                    index.index(&store.segments).await?;
                    answer(embedder, index, model, config.retrieval, query).await?;
                }
                Backend::Qdrant => {
                    let mut index = QdrantIndex::new(qdrant_url, qdrant_collection.clone())?;
                    index.index(&store.segments).await?;
                    answer(embedder, index, model, config.retrieval, query).await?;
                }
            }
        }
        Command::Compare {
            text_a,
            text_b,
            model,
        } => {
            let embedder = embedder_for(
                &cli,
                &EmbeddingOptions {
                    model: model.clone(),
                    ..EmbeddingOptions::default()
                },
            )?;
            let left = embedder.embed(text_a).await?;
            let right = embedder.embed(text_b).await?;
            println!("similarity: {:.2}", cosine_similarity(&left, &right));
        }
    }

    Ok(())
}

fn embedder_for(cli: &Cli, options: &EmbeddingOptions) -> anyhow::Result<Box<dyn Embedder>> {
    if cli.offline_embeddings || options.model == CHARACTER_NGRAM_MODEL {
        return Ok(Box::new(CharacterNgramEmbedder {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            normalize: options.normalize,
        }));
    }

    Ok(Box::new(HttpEmbedder::new(
        &cli.embedding_url,
        options.model.clone(),
        cli.embedding_api_key.clone(),
        options.normalize,
    )?))
}

fn segment(pdf_dir: &Path, output: &Path, options: SegmentationOptions) -> anyhow::Result<()> {
    let segmenter = Segmenter::new(options)?;
    let build = build_corpus(pdf_dir, &LopdfExtractor, &segmenter)?;

    for skipped in &build.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
    }
    if !build.chain_violations.is_empty() {
        warn!(
            violations = build.chain_violations.len(),
            "segments written with dangling chain links"
        );
    }

    let file = SegmentFile {
        documents: build.documents,
        segments: build.segments,
    };
    file.save(output)?;
    println!(
        "{} segments from {} pdfs written to {}",
        file.segments.len(),
        file.documents.len(),
        output.display()
    );
    Ok(())
}

async fn embed(
    cli: &Cli,
    segments_path: &Path,
    output: &Path,
    mut options: EmbeddingOptions,
) -> anyhow::Result<()> {
    if cli.offline_embeddings {
        options.model = CHARACTER_NGRAM_MODEL.to_string();
    }
    let embedder = embedder_for(cli, &options)?;

    let SegmentFile {
        documents,
        mut segments,
    } = SegmentFile::load(segments_path)
        .with_context(|| format!("loading segments {}", segments_path.display()))?;
    if segments.is_empty() {
        bail!("{} holds no segments", segments_path.display());
    }
    info!(segments = segments.len(), model = %options.model, "embedding segments");

    embed_segments(&embedder, &mut segments, options.batch_size).await?;
    let store = SegmentStore::new(&options, documents, segments)?;
    store.save(output)?;

    println!(
        "{} segments with {}-dimensional embeddings written to {}",
        store.segments.len(),
        store.dimensions,
        output.display()
    );
    Ok(())
}

async fn answer<E, I>(
    embedder: E,
    index: I,
    model: OpenAiChatModel,
    options: RetrievalOptions,
    queries: &[String],
) -> anyhow::Result<()>
where
    E: Embedder,
    I: SegmentIndex,
{
    let pipeline = RagPipeline::new(embedder, index, model, options);

    for query in queries {
        let answer = pipeline.run_with_retry(query).await?;
        if answer.attempts > 1 {
            info!(attempts = answer.attempts, "needed retries");
        }
        println!("{}", "-".repeat(100));
        println!("Query: {query}\n\n{}\n", answer.text);
    }

    Ok(())
}
