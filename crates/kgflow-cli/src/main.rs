//! kgflow CLI - Command-line interface
//!
//! Usage:
//!   kgflow ingest <path> [--output graph.json] [--source-id id]
//!   kgflow config
//!
//! Both commands accept `--config kgflow.toml`; environment variables
//! override file values.

mod chunker;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::stream;

use kgflow_core::{AppConfig, EmbeddingClient, LlmClient, LoggingConfig};
use kgflow_extractor::{LlmRelationExtractor, RelationPromptConfig, RelationVocabulary};
use kgflow_llm::{create_embedding_client, create_llm_client, CachedEmbeddingClient};
use kgflow_pipeline::{JsonFileSink, Pipeline, RunOutcome};

#[derive(Parser)]
#[command(name = "kgflow")]
#[command(about = "Streaming entity and relation extraction into a knowledge graph")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a knowledge graph from a text document
    Ingest {
        /// Path to the document
        path: PathBuf,

        /// Write the graph here instead of stdout (a directory gets one file per document)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Document identifier; defaults to the file stem
        #[arg(long)]
        source_id: Option<String>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Ingest {
            path,
            output,
            source_id,
        } => ingest(&config, &path, output, source_id).await,
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn ingest(
    config: &AppConfig,
    path: &Path,
    output: Option<PathBuf>,
    source_id: Option<String>,
) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let source_id = source_id.unwrap_or_else(|| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    });

    let chunks = chunker::chunk_text(&source_id, &text, config.chunking.max_chunk_chars);
    tracing::info!(source_id = %source_id, chunks = chunks.len(), "Document chunked");

    let llm: Arc<dyn LlmClient> = Arc::from(create_llm_client(&config.llm)?);
    let embedder: Arc<dyn EmbeddingClient> = Arc::from(create_embedding_client(&config.llm)?);
    let embedder = Arc::new(CachedEmbeddingClient::new(embedder));
    let cache_stats = embedder.stats();

    let prompt = RelationPromptConfig {
        max_tokens: config.llm.max_tokens,
        temperature: config.llm.temperature,
        ..RelationPromptConfig::default()
    };
    let relations = LlmRelationExtractor::new(llm).with_config(prompt);
    let vocabulary = Arc::new(RelationVocabulary::with_config(&config.relations)?);

    let mut pipeline = Pipeline::new(config.pipeline.clone(), embedder, Arc::new(relations))
        .with_vocabulary(vocabulary);
    if let Some(output) = &output {
        pipeline = pipeline.with_sink(Arc::new(JsonFileSink::new(output)));
    }

    let handle = pipeline.start(stream::iter(chunks));
    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let outcome = handle.wait().await;
    for event in outcome.events() {
        eprintln!(
            "  [{}] {} {:?}: {}",
            event.stage, event.item_id, event.error_kind, event.message
        );
    }

    match outcome {
        RunOutcome::Completed(report) => {
            tracing::info!(
                run_id = %report.run_id,
                entities = report.graph.entities.len(),
                relations = report.graph.relations.len(),
                item_errors = report.stats.item_errors,
                cache_hit_rate = cache_stats.hit_rate(),
                "Ingestion complete"
            );
            match output {
                Some(output) => println!(
                    "Wrote {} entities and {} relations to {}",
                    report.graph.entities.len(),
                    report.graph.relations.len(),
                    output.display()
                ),
                None => println!("{}", serde_json::to_string_pretty(&report.graph)?),
            }
            Ok(())
        }
        RunOutcome::Cancelled { run_id, stats, .. } => {
            bail!(
                "run {run_id} cancelled after {} chunks ({} queued items dropped)",
                stats.chunks,
                stats.dropped_on_cancel
            )
        }
        RunOutcome::Failed { run_id, error, .. } => {
            Err(error).with_context(|| format!("run {run_id} failed"))
        }
    }
}
