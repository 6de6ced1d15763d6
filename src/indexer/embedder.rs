//! Embedding generation
//!
//! [`Embedder`] is the seam to the numerical backend. [`FastEmbedder`] runs a local
//! ONNX sentence-embedding model through fastembed; [`HashingEmbedder`] is a
//! deterministic feature-hashing embedder that needs no model download.

#[cfg(feature = "local-model")]
use fastembed::{EmbeddingModel, TextEmbedding, TextInitOptions};
#[cfg(feature = "local-model")]
use std::path::PathBuf;
#[cfg(feature = "local-model")]
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Dimension of the all-MiniLM-L6-v2 sentence embedding model
pub const MINILM_DIMENSION: usize = 384;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("Failed to initialize embedding model: {0}")]
    InitError(String),
    #[error("Failed to generate embeddings: {0}")]
    EmbedError(String),
    #[error("Model not initialized")]
    NotInitialized,
    #[error("Embedding timed out after {0:?}")]
    Timeout(Duration),
    #[error("Embedding cancelled")]
    Cancelled,
    #[error("Malformed embedding output: {0}")]
    MalformedOutput(String),
}

/// Maps text to fixed-dimension vectors
///
/// Implementations must be deterministic for a fixed model: the same text always
/// yields the same vector, and `embed` preserves input length and order.
pub trait Embedder: Send + Sync {
    /// Identifier of the model and version; part of every cache key
    fn model_id(&self) -> &str;

    /// Length of every vector this embedder produces
    fn dimension(&self) -> usize;

    /// Embed a batch of texts; output[i] corresponds to texts[i]
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;
}

/// Wrapper around fastembed's TextEmbedding model
#[cfg(feature = "local-model")]
pub struct FastEmbedder {
    model: Mutex<Option<TextEmbedding>>,
    cache_dir: Option<PathBuf>,
    batch_size: usize,
}

#[cfg(feature = "local-model")]
impl FastEmbedder {
    /// Create a new embedder (lazy initialization)
    pub fn new() -> Self {
        Self {
            model: Mutex::new(None),
            cache_dir: None,
            batch_size: 64,
        }
    }

    /// Create a new embedder with a custom cache directory for model persistence
    pub fn with_cache_dir(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir: Some(cache_dir),
            ..Self::new()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Initialize the embedding model
    /// This downloads the model on first use (~80MB) to the cache directory
    pub fn initialize(&self) -> Result<(), EmbedderError> {
        let mut model_guard = self
            .model
            .lock()
            .map_err(|_| EmbedderError::InitError("model lock poisoned".to_string()))?;
        if model_guard.is_some() {
            return Ok(());
        }

        let mut options = TextInitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(true);

        // Set cache directory if provided for persistent model storage
        if let Some(ref cache_dir) = self.cache_dir {
            options = options.with_cache_dir(cache_dir.clone());
        }

        let model = TextEmbedding::try_new(options)
            .map_err(|e| EmbedderError::InitError(e.to_string()))?;

        log::info!("Loaded embedding model {}", Self::MODEL_ID);
        *model_guard = Some(model);
        Ok(())
    }

    /// Check if the model is initialized
    pub fn is_initialized(&self) -> bool {
        self.model.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    const MODEL_ID: &'static str = "sentence-transformers/all-MiniLM-L6-v2";
}

#[cfg(feature = "local-model")]
impl Default for FastEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "local-model")]
impl Embedder for FastEmbedder {
    fn model_id(&self) -> &str {
        Self::MODEL_ID
    }

    fn dimension(&self) -> usize {
        MINILM_DIMENSION
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.initialize()?;

        let mut model_guard = self
            .model
            .lock()
            .map_err(|_| EmbedderError::EmbedError("model lock poisoned".to_string()))?;
        let model = model_guard.as_mut().ok_or(EmbedderError::NotInitialized)?;

        model
            .embed(texts.to_vec(), Some(self.batch_size))
            .map_err(|e| EmbedderError::EmbedError(e.to_string()))
    }
}

/// Deterministic bag-of-tokens embedder using signed feature hashing
///
/// Identifiers are split on non-alphanumeric characters and lowercased; each token
/// is hashed with blake3 into one of `dimension` buckets. The result is L2-normalised.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashingEmbedder {
    /// Create an embedder producing `dimension`-length vectors; zero is rejected
    pub fn new(dimension: usize) -> Result<Self, EmbedderError> {
        if dimension == 0 {
            return Err(EmbedderError::InitError("hashing dimension must be positive".to_string()));
        }
        Ok(Self::sized(dimension))
    }

    fn sized(dimension: usize) -> Self {
        Self {
            dimension,
            model_id: format!("feature-hashing-v1/{}", dimension),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&bytes[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in vector.iter_mut() {
                *x /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::sized(MINILM_DIMENSION)
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "local-model")]
    #[test]
    fn test_fast_embedder_is_lazy() {
        let embedder = FastEmbedder::new();
        assert!(!embedder.is_initialized());
        assert_eq!(embedder.dimension(), 384);
        assert!(embedder.embed(&[]).unwrap().is_empty());
        assert!(!embedder.is_initialized());
    }

    #[test]
    fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed(&["fn parse_config(path: &Path)"]).unwrap();
        let b = embedder.embed(&["fn parse_config(path: &Path)"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 384);
    }

    #[test]
    fn test_hashing_embedder_preserves_order_and_length() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let texts = ["alpha beta", "gamma", "", "alpha beta"];
        let vectors = embedder.embed(&texts).unwrap();

        assert_eq!(vectors.len(), 4);
        assert_eq!(vectors[0], vectors[3]);
        assert_ne!(vectors[0], vectors[1]);
        assert!(vectors[2].iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_hashing_embedder_normalizes() {
        let embedder = HashingEmbedder::new(32).unwrap();
        let vector = &embedder.embed(&["retry backoff retry jitter"]).unwrap()[0];
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_model_id_includes_dimension() {
        assert_eq!(HashingEmbedder::new(128).unwrap().model_id(), "feature-hashing-v1/128");
    }

    #[test]
    fn test_hashing_embedder_rejects_zero_dimension() {
        let err = HashingEmbedder::new(0).unwrap_err();
        assert!(matches!(err, EmbedderError::InitError(_)));
        assert!(err.to_string().contains("dimension must be positive"));
    }

    #[test]
    fn test_tokenize_splits_identifiers() {
        let tokens: Vec<String> = tokenize("Foo::bar_baz(x1)").collect();
        assert_eq!(tokens, vec!["foo", "bar", "baz", "x1"]);
    }
}
