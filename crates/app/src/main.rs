use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use pagegraph_core::{
    AnyEmbedder, CharacterNgramEmbedder, Embedder, GraphOptions, GraphStore, HttpEmbedder,
    IndexPipeline, IndexingOptions, Neo4jStore, QdrantStore, QueryEngine, QueryOptions,
    VectorIndex, DEFAULT_EMBEDDING_DIMENSIONS,
};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pagegraph", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "document_chunks")]
    qdrant_collection: String,

    /// Neo4j HTTP base URL
    #[arg(long, env = "NEO4J_URL", default_value = "http://localhost:7474")]
    neo4j_url: String,

    /// Neo4j database name
    #[arg(long, env = "NEO4J_DATABASE", default_value = "neo4j")]
    neo4j_db: String,

    /// Neo4j username
    #[arg(long, env = "NEO4J_USER", default_value = "neo4j")]
    neo4j_user: String,

    /// Neo4j password
    #[arg(long, env = "NEO4J_PASSWORD", default_value = "password")]
    neo4j_password: String,

    /// Ollama-compatible embedding server. The local trigram embedder is used when unset.
    #[arg(long, env = "EMBEDDING_URL")]
    embedding_url: Option<String>,

    /// Embedding model name sent to the embedding server
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "nomic-embed-text")]
    embedding_model: String,

    /// Embedding vector length
    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Per-request timeout for every backend call, in seconds
    #[arg(long, env = "BACKEND_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Sequential hops and similarity neighbours returned as context
    #[arg(long, default_value_t = 5)]
    context_limit: usize,

    /// Characters kept from each context chunk
    #[arg(long, default_value_t = 200)]
    context_preview_chars: usize,

    /// Characters kept from each chunk in document info
    #[arg(long, default_value_t = 150)]
    summary_preview_chars: usize,
}

#[derive(Args)]
struct IndexArgs {
    /// Folder that contains page-marked documents, searched recursively.
    #[arg(long)]
    folder: PathBuf,

    /// Pages below this word count are merged with the following page.
    #[arg(long, default_value_t = 50)]
    min_words: usize,

    /// Points per vector upsert request.
    #[arg(long, default_value_t = 50)]
    batch_size: usize,

    /// Minimum keyword length for similarity edges.
    #[arg(long, default_value_t = 5)]
    min_keyword_len: usize,

    /// Shared keywords needed for a similarity edge.
    #[arg(long, default_value_t = 3)]
    similarity_threshold: usize,

    /// Lookahead window for similarity edges, exclusive.
    #[arg(long, default_value_t = 6)]
    similarity_window: usize,

    /// Shared keywords stored on each similarity edge.
    #[arg(long, default_value_t = 5)]
    max_shared_keywords: usize,
}

impl IndexArgs {
    fn options(&self) -> IndexingOptions {
        IndexingOptions {
            min_words: self.min_words,
            batch_size: self.batch_size,
            graph: GraphOptions {
                min_keyword_len: self.min_keyword_len,
                similarity_threshold: self.similarity_threshold,
                similarity_window: self.similarity_window,
                max_shared_keywords: self.max_shared_keywords,
            },
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Segment, embed and graph every document in a folder, replacing earlier builds.
    Index(IndexArgs),
    /// Vector search over chunks.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
        /// Restrict hits to one document id.
        #[arg(long)]
        document: Option<String>,
    },
    /// Vector search with sequential and similarity context per hit.
    Hybrid {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
        #[arg(long)]
        document: Option<String>,
        /// Skip graph expansion.
        #[arg(long, default_value_t = false)]
        no_expand: bool,
    },
    /// Fetch one page, or a page range, with navigation links.
    Page {
        #[arg(long)]
        document: String,
        #[arg(long)]
        start: u32,
        #[arg(long)]
        end: Option<u32>,
    },
    /// Chunk summaries and edge counts for one document.
    Info {
        #[arg(long)]
        document: String,
    },
    /// All indexed documents.
    List,
    /// Vector collection and graph statistics.
    Status,
}

impl Cli {
    fn query_options(&self) -> QueryOptions {
        QueryOptions {
            context_limit: self.context_limit,
            context_preview_chars: self.context_preview_chars,
            summary_preview_chars: self.summary_preview_chars,
        }
    }

    fn embedder(&self, timeout: Duration) -> anyhow::Result<AnyEmbedder> {
        Ok(match &self.embedding_url {
            Some(url) => AnyEmbedder::Http(
                HttpEmbedder::new(url, &self.embedding_model, self.embedding_dimensions, timeout)
                    .context("embedding client")?,
            ),
            None => AnyEmbedder::Local(CharacterNgramEmbedder {
                dimensions: self.embedding_dimensions,
            }),
        })
    }
}

fn print_json(value: Value) -> anyhow::Result<()> {
    if let Some(error) = value.get("error").filter(|error| !error.is_null()) {
        warn!(%error, "request finished with an error");
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn run_query<E, V, G>(engine: &QueryEngine<E, V, G>, command: Command) -> anyhow::Result<()>
where
    E: Embedder + Send + Sync,
    V: VectorIndex + Send + Sync,
    G: GraphStore + Send + Sync,
{
    let value = match command {
        Command::Search {
            query,
            limit,
            document,
        } => serde_json::to_value(engine.search(&query, limit, document.as_deref()).await)?,
        Command::Hybrid {
            query,
            limit,
            document,
            no_expand,
        } => serde_json::to_value(
            engine
                .hybrid_search(&query, limit, document.as_deref(), !no_expand)
                .await,
        )?,
        Command::Page {
            document,
            start,
            end,
        } => serde_json::to_value(engine.page(&document, start, end).await)?,
        Command::Info { document } => serde_json::to_value(engine.document_info(&document).await)?,
        Command::List => serde_json::to_value(engine.list_documents().await)?,
        Command::Status => serde_json::to_value(engine.status().await)?,
        Command::Index(_) => anyhow::bail!("index is not a query command"),
    };
    print_json(value)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout_secs);

    let embedder = cli.embedder(timeout)?;
    let vector = QdrantStore::with_timeout(
        &cli.qdrant_url,
        &cli.qdrant_collection,
        embedder.dimensions(),
        timeout,
    )
    .context("qdrant client")?;
    let graph = Neo4jStore::with_timeout(
        &cli.neo4j_url,
        &cli.neo4j_db,
        &cli.neo4j_user,
        &cli.neo4j_password,
        timeout,
    )
    .context("neo4j client")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "pagegraph boot"
    );

    let query_options = cli.query_options();
    match cli.command {
        Command::Index(args) => {
            let pipeline = IndexPipeline::new(&embedder, &vector, &graph, args.options());
            let report = pipeline.run(&args.folder).await?;
            info!(
                folder = %args.folder.display(),
                total_chunks = report.totals.chunks,
                merged_chunks = report.totals.merged_chunks,
                pages_merged = report.totals.pages_merged,
                "index finished at {}",
                Utc::now().to_rfc3339()
            );
            print_json(serde_json::to_value(&report)?)?;
        }
        command => {
            let engine = QueryEngine::new(embedder, vector, graph).with_options(query_options);
            run_query(&engine, command).await?;
        }
    }

    Ok(())
}
