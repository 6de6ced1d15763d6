//! Semantic retrieval over a codebase for grounding coding-assistant prompts.
//!
//! Files are chunked into functions, classes, or fixed-size text windows, embedded,
//! and ranked against a query by vector distance:
//!
//! ```no_run
//! use std::sync::Arc;
//! use coderag::{chunk_files, scan_repository, HashingEmbedder, IndexerConfig, RetrievalSession};
//!
//! let config = IndexerConfig::default();
//! let files = scan_repository(std::path::Path::new("."), &config.scan).unwrap();
//! let chunks = chunk_files(&files, config.max_window_size).unwrap();
//! let session = RetrievalSession::new(Arc::new(HashingEmbedder::default()));
//! let top = session.retrieve("where is the config parsed?", &chunks, config.top_k).unwrap();
//! println!("{}", coderag::build_prompt("where is the config parsed?", &top));
//! ```

pub mod indexer;

pub use indexer::cache::{CachedEmbedder, EmbeddingCache};
pub use indexer::chunker::{chunk_file, chunk_files, chunk_files_with_diagnostics, ChunkReport, ParseRecoveryApplied};
#[cfg(feature = "local-model")]
pub use indexer::embedder::FastEmbedder;
pub use indexer::embedder::{Embedder, EmbedderError, HashingEmbedder};
pub use indexer::error::RetrievalError;
pub use indexer::index::{DistanceMetric, VectorIndex};
pub use indexer::prompt::build_prompt;
pub use indexer::retriever::{CancelToken, ChunkSetKey, IndexHandle, RetrievalSession};
pub use indexer::scanner::{scan_repository, ScanError};
pub use indexer::{Chunk, ChunkKind, IndexerConfig, LineSpan, ScanConfig, SearchResult, SourceFile};
