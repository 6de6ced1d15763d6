//! Codebase indexer for retrieval-augmented prompts
//!
//! This module turns source files into semantically searchable chunks, embeds them,
//! and answers top-K similarity queries. It uses tree-sitter for syntax-aware chunking,
//! fastembed for local embedding generation, and an in-memory exact-search index.

pub mod cache;
pub mod chunker;
pub mod embedder;
pub mod error;
pub mod index;
pub mod prompt;
pub mod retriever;
pub mod scanner;
pub mod tree_sitter_parser;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use error::RetrievalError;
use index::DistanceMetric;

/// A file handed to the chunker by the repository scanner (or any other file source)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path identifying the file, stable across re-chunking runs
    pub path: String,
    /// Full text content
    pub content: String,
    /// Modification time when the file was read
    pub last_modified: DateTime<Utc>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            last_modified,
        }
    }
}

/// What a chunk represents in its source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkKind {
    Function,
    Class,
    TextWindow,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Class => "class",
            ChunkKind::TextWindow => "text-window",
        }
    }
}

/// Inclusive, 1-indexed line range of a structural chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineSpan {
    pub start_line: u32,
    pub end_line: u32,
}

/// One retrievable unit of source text with metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Path of the originating file
    pub source_path: String,
    pub kind: ChunkKind,
    /// Declared identifier, present for function and class chunks
    pub name: Option<String>,
    /// The exact text span this chunk represents
    pub content: String,
    /// Window position, present only when a file was split into several windows
    pub sequence_index: Option<usize>,
    /// Line range, present for function and class chunks
    pub lines: Option<LineSpan>,
    /// Language hint (e.g., "rust", "python")
    pub language: Option<String>,
    /// Modification time of the source file when the chunk was created
    pub last_modified: DateTime<Utc>,
}

/// A search result with its distance to the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    /// Lower is more similar
    pub distance: f32,
}

/// Configuration for the repository scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory names skipped anywhere in the tree
    pub ignore_dirs: Vec<String>,
    /// File extensions treated as binary and never read
    pub skip_extensions: Vec<String>,
    /// Skip files and directories whose name starts with a dot
    pub skip_hidden: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ignore_dirs: vec![
                ".git".to_string(),
                "venv".to_string(),
                ".venv".to_string(),
                "__pycache__".to_string(),
                "node_modules".to_string(),
                "target".to_string(),
                "dist".to_string(),
                "build".to_string(),
                ".idea".to_string(),
                ".vscode".to_string(),
            ],
            skip_extensions: vec![
                "png".to_string(),
                "jpg".to_string(),
                "jpeg".to_string(),
                "gif".to_string(),
                "exe".to_string(),
                "dll".to_string(),
                "so".to_string(),
                "bin".to_string(),
                "ico".to_string(),
                "pdf".to_string(),
                "zip".to_string(),
                "gz".to_string(),
            ],
            skip_hidden: true,
        }
    }
}

/// Configuration for the indexer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Maximum characters per text window
    pub max_window_size: usize,
    /// Number of chunks returned per query
    pub top_k: usize,
    /// Distance used to rank chunks
    pub metric: DistanceMetric,
    /// Deadline for a single embedding call, in milliseconds
    pub embedding_timeout_ms: Option<u64>,
    /// Texts per call into the embedding model
    pub embed_batch_size: usize,
    /// Number of built indexes kept by a retrieval session
    pub index_cache_capacity: usize,
    /// SQLite file for the persistent embedding cache
    pub cache_path: Option<PathBuf>,
    pub scan: ScanConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_window_size: chunker::DEFAULT_MAX_WINDOW_SIZE,
            top_k: retriever::DEFAULT_TOP_K,
            metric: DistanceMetric::default(),
            embedding_timeout_ms: None,
            embed_batch_size: 64,
            index_cache_capacity: 8,
            cache_path: None,
            scan: ScanConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(raw: &str) -> Result<Self, RetrievalError> {
        let config: IndexerConfig = toml::from_str(raw)
            .map_err(|e| RetrievalError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, RetrievalError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            RetrievalError::InvalidConfiguration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), RetrievalError> {
        if self.max_window_size == 0 {
            return Err(RetrievalError::InvalidConfiguration(
                "max_window_size must be positive".to_string(),
            ));
        }
        if self.embed_batch_size == 0 {
            return Err(RetrievalError::InvalidConfiguration(
                "embed_batch_size must be positive".to_string(),
            ));
        }
        if self.index_cache_capacity == 0 {
            return Err(RetrievalError::InvalidConfiguration(
                "index_cache_capacity must be positive".to_string(),
            ));
        }
        if self.embedding_timeout_ms == Some(0) {
            return Err(RetrievalError::InvalidConfiguration(
                "embedding_timeout_ms must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = IndexerConfig::default();
        assert_eq!(config.max_window_size, 1000);
        assert_eq!(config.top_k, 3);
        assert_eq!(config.metric, DistanceMetric::SquaredEuclidean);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml_overrides_defaults() {
        let config = IndexerConfig::from_toml_str(
            r#"
max_window_size = 500
top_k = 5
metric = "cosine"
embedding_timeout_ms = 2000

[scan]
ignore_dirs = ["vendor"]
"#,
        )
        .unwrap();

        assert_eq!(config.max_window_size, 500);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.metric, DistanceMetric::Cosine);
        assert_eq!(config.embedding_timeout_ms, Some(2000));
        assert_eq!(config.scan.ignore_dirs, vec!["vendor".to_string()]);
        assert!(config.scan.skip_hidden);
        assert_eq!(config.embed_batch_size, 64);
    }

    #[test]
    fn test_config_rejects_zero_window() {
        let err = IndexerConfig::from_toml_str("max_window_size = 0").unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_config_rejects_malformed_toml() {
        let err = IndexerConfig::from_toml_str("max_window_size = \"big\"").unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_chunk_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ChunkKind::TextWindow).unwrap();
        assert_eq!(json, "\"text-window\"");
        assert_eq!(ChunkKind::Function.as_str(), "function");
    }
}
