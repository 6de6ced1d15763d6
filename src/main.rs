use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coderag::{
    build_prompt, chunk_files_with_diagnostics, scan_repository, CachedEmbedder, Embedder, EmbeddingCache,
    HashingEmbedder, IndexerConfig, RetrievalSession,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "coderag", version, about = "Retrieve relevant code for a question about a repository")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum characters per text window
    #[arg(long, global = true)]
    window_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the prompt assembled from the chunks most relevant to a query
    Query {
        /// Repository root
        root: PathBuf,
        /// Natural-language question
        text: String,
        /// Number of chunks to include
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Use the feature-hashing embedder instead of the local model
        #[arg(long)]
        offline: bool,
    },
    /// List the chunks a repository would be indexed as
    Chunks {
        /// Repository root
        root: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => IndexerConfig::load(path)?,
        None => IndexerConfig::default(),
    };
    if let Some(window_size) = cli.window_size {
        config.max_window_size = window_size;
    }
    config.validate()?;

    match cli.command {
        Command::Query {
            root,
            text,
            top_k,
            offline,
        } => {
            let files = scan_repository(&root, &config.scan)?;
            let report = chunk_files_with_diagnostics(&files, config.max_window_size)?;
            let embedder = make_embedder(&config, offline)?;
            let session = RetrievalSession::with_config(embedder, &config)?;

            let top_k = top_k.unwrap_or(config.top_k);
            let chunks = session
                .retrieve(&text, &report.chunks, top_k)
                .context("retrieval failed")?;
            println!("{}", build_prompt(&text, &chunks));
        }
        Command::Chunks { root } => {
            let files = scan_repository(&root, &config.scan)?;
            let report = chunk_files_with_diagnostics(&files, config.max_window_size)?;
            for chunk in &report.chunks {
                let lines = chunk
                    .lines
                    .map(|span| format!("{}-{}", span.start_line, span.end_line))
                    .unwrap_or_else(|| "-".to_string());
                let label = match (&chunk.name, chunk.sequence_index) {
                    (Some(name), _) => name.clone(),
                    (None, Some(index)) => format!("#{}", index),
                    (None, None) => String::new(),
                };
                println!(
                    "{}\t{}\t{}\t{}\t{} chars",
                    chunk.source_path,
                    chunk.kind.as_str(),
                    label,
                    lines,
                    chunk.content.chars().count()
                );
            }
            for recovery in &report.recoveries {
                eprintln!("windowed after parse failure: {} ({})", recovery.source_path, recovery.reason);
            }
        }
    }

    Ok(())
}

fn make_embedder(config: &IndexerConfig, offline: bool) -> Result<Arc<dyn Embedder>> {
    if offline {
        return with_cache(HashingEmbedder::default(), config.cache_path.as_deref());
    }

    #[cfg(feature = "local-model")]
    let embedder = coderag::FastEmbedder::new().with_batch_size(config.embed_batch_size);

    #[cfg(not(feature = "local-model"))]
    let embedder = {
        log::warn!("Built without the local-model feature; using the feature-hashing embedder");
        HashingEmbedder::default()
    };

    with_cache(embedder, config.cache_path.as_deref())
}

fn with_cache<E: Embedder + 'static>(embedder: E, cache_path: Option<&Path>) -> Result<Arc<dyn Embedder>> {
    Ok(match cache_path {
        Some(path) => {
            let cache = EmbeddingCache::open(path)
                .with_context(|| format!("failed to open embedding cache {}", path.display()))?;
            Arc::new(CachedEmbedder::new(embedder, cache))
        }
        None => Arc::new(embedder),
    })
}
