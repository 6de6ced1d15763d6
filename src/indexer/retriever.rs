//! Top-K retrieval over a chunk set
//!
//! A [`RetrievalSession`] owns one embedder handle and the most recently built vector
//! index. `retrieve` re-embeds and builds a fresh index on every call; `build_index` +
//! `query` reuse a built index for as long as the chunk set's content hash is unchanged.

use super::embedder::{Embedder, EmbedderError};
use super::error::RetrievalError;
use super::index::{DistanceMetric, VectorIndex};
use super::{Chunk, IndexerConfig, SearchResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_TOP_K: usize = 3;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Cooperative cancellation flag shared between a caller and a session
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounds on a single embedding call
#[derive(Debug, Clone, Default)]
pub struct EmbedGuard {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl EmbedGuard {
    fn is_unbounded(&self) -> bool {
        self.timeout.is_none() && self.cancel.is_none()
    }
}

/// Content hash identifying a chunk set under one embedder and metric
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkSetKey(String);

impl ChunkSetKey {
    pub fn compute(model_id: &str, dimension: usize, metric: DistanceMetric, chunks: &[Chunk]) -> Self {
        let mut hasher = blake3::Hasher::new();
        let mut field = |bytes: &[u8]| {
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };

        field(model_id.as_bytes());
        field(&(dimension as u64).to_le_bytes());
        field(metric.as_str().as_bytes());
        for chunk in chunks {
            field(chunk.source_path.as_bytes());
            field(chunk.kind.as_str().as_bytes());
            field(chunk.name.as_deref().unwrap_or("").as_bytes());
            field(&chunk.sequence_index.map_or(u64::MAX, |i| i as u64).to_le_bytes());
            match chunk.lines {
                Some(span) => {
                    field(&span.start_line.to_le_bytes());
                    field(&span.end_line.to_le_bytes());
                }
                None => field(b""),
            }
            field(chunk.language.as_deref().unwrap_or("").as_bytes());
            field(chunk.last_modified.to_rfc3339().as_bytes());
            field(chunk.content.as_bytes());
        }

        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A built index that can be queried repeatedly
#[derive(Debug, Clone)]
pub struct IndexHandle {
    key: ChunkSetKey,
    index: Arc<VectorIndex>,
}

impl IndexHandle {
    pub fn key(&self) -> &ChunkSetKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Most-recently-built indexes, oldest evicted first
#[derive(Debug)]
struct IndexCache {
    capacity: usize,
    entries: VecDeque<IndexHandle>,
}

impl IndexCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    fn get(&mut self, key: &ChunkSetKey) -> Option<IndexHandle> {
        let position = self.entries.iter().position(|handle| &handle.key == key)?;
        let handle = self.entries.remove(position)?;
        self.entries.push_back(handle.clone());
        Some(handle)
    }

    fn insert(&mut self, handle: IndexHandle) {
        self.entries.retain(|existing| existing.key != handle.key);
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(handle);
    }

    fn remove(&mut self, key: &ChunkSetKey) -> bool {
        let before = self.entries.len();
        self.entries.retain(|handle| &handle.key != key);
        self.entries.len() != before
    }
}

/// Retrieval state for one request or one repository load
pub struct RetrievalSession {
    embedder: Arc<dyn Embedder>,
    index: RwLock<Arc<VectorIndex>>,
    metric: DistanceMetric,
    guard: EmbedGuard,
    cache: Mutex<IndexCache>,
}

impl RetrievalSession {
    /// Create a session with default settings
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        let config = IndexerConfig::default();
        Self::build(embedder, &config)
    }

    /// Create a session from a validated configuration
    pub fn with_config(embedder: Arc<dyn Embedder>, config: &IndexerConfig) -> Result<Self, RetrievalError> {
        config.validate()?;
        Ok(Self::build(embedder, config))
    }

    fn build(embedder: Arc<dyn Embedder>, config: &IndexerConfig) -> Self {
        let dimension = embedder.dimension();
        Self {
            index: RwLock::new(Arc::new(VectorIndex::new(dimension, config.metric))),
            metric: config.metric,
            guard: EmbedGuard {
                timeout: config.embedding_timeout_ms.map(Duration::from_millis),
                cancel: None,
            },
            cache: Mutex::new(IndexCache::new(config.index_cache_capacity.max(1))),
            embedder,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.guard.timeout = Some(timeout);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.guard.cancel = Some(token);
        self
    }

    /// The index built by the latest [`retrieve`](Self::retrieve)
    pub fn index(&self) -> Arc<VectorIndex> {
        Arc::clone(&self.index.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Return the `top_k` chunks most relevant to `query`
    ///
    /// Embeds every chunk into a fresh index, publishes it as the session index, then
    /// embeds the query and searches that same index. Concurrent calls never see each
    /// other's chunks. An empty chunk set returns an empty result without calling the embedder.
    pub fn retrieve(&self, query: &str, chunks: &[Chunk], top_k: usize) -> Result<Vec<Chunk>, RetrievalError> {
        let index = VectorIndex::new(self.embedder.dimension(), self.metric);
        if chunks.is_empty() {
            self.publish(Arc::new(index));
            return Ok(vec![]);
        }

        let vectors = self.embed_guarded(chunks.iter().map(|c| c.content.clone()).collect())?;
        index.rebuild(chunks.iter().cloned().zip(vectors).collect())?;
        let index = Arc::new(index);
        self.publish(Arc::clone(&index));

        let query_vector = self.embed_query(query)?;
        index.search(&query_vector, top_k)
    }

    fn publish(&self, index: Arc<VectorIndex>) {
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = index;
    }

    /// Build (or fetch from the session cache) an index for a chunk set
    pub fn build_index(&self, chunks: &[Chunk]) -> Result<IndexHandle, RetrievalError> {
        let key = ChunkSetKey::compute(
            self.embedder.model_id(),
            self.embedder.dimension(),
            self.metric,
            chunks,
        );

        if let Some(handle) = self.lock_cache().get(&key) {
            log::debug!("Reusing index {} ({} entries)", &key.as_str()[..12], handle.len());
            return Ok(handle);
        }

        let index = VectorIndex::new(self.embedder.dimension(), self.metric);
        if !chunks.is_empty() {
            let vectors = self.embed_guarded(chunks.iter().map(|c| c.content.clone()).collect())?;
            index.rebuild(chunks.iter().cloned().zip(vectors).collect())?;
        }
        log::info!("Built index {} with {} chunks", &key.as_str()[..12], chunks.len());

        let handle = IndexHandle {
            key,
            index: Arc::new(index),
        };
        self.lock_cache().insert(handle.clone());
        Ok(handle)
    }

    /// Search a built index
    pub fn query(&self, handle: &IndexHandle, text: &str, k: usize) -> Result<Vec<Chunk>, RetrievalError> {
        Ok(self
            .query_scored(handle, text, k)?
            .into_iter()
            .map(|result| result.chunk)
            .collect())
    }

    /// Search a built index, keeping distances
    pub fn query_scored(&self, handle: &IndexHandle, text: &str, k: usize) -> Result<Vec<SearchResult>, RetrievalError> {
        if handle.is_empty() {
            return Ok(vec![]);
        }
        let query_vector = self.embed_query(text)?;
        handle.index.search_scored(&query_vector, k)
    }

    /// Drop a cached index; returns whether it was present
    pub fn invalidate(&self, key: &ChunkSetKey) -> bool {
        self.lock_cache().remove(key)
    }

    pub fn clear_cache(&self) {
        self.lock_cache().entries.clear();
    }

    pub fn cached_indexes(&self) -> usize {
        self.lock_cache().entries.len()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, IndexCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>, RetrievalError> {
        self.embed_guarded(vec![query.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::RetrievalUnavailable("no query embedding returned".to_string()))
    }

    /// Embed texts under the session's timeout and cancellation bounds, validating the output
    fn embed_guarded(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let expected = texts.len();
        let outcome = if self.guard.is_unbounded() {
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            self.embedder.embed(&refs)
        } else {
            self.embed_on_worker(texts)
        };
        let vectors = outcome.map_err(|e| {
            log::warn!("Embedding backend failed: {}", e);
            RetrievalError::from(e)
        })?;

        if vectors.len() != expected {
            return Err(EmbedderError::MalformedOutput(format!(
                "expected {} vectors, got {}",
                expected,
                vectors.len()
            ))
            .into());
        }
        let dimension = self.embedder.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(EmbedderError::MalformedOutput(format!(
                "expected dimension {}, got {}",
                dimension,
                bad.len()
            ))
            .into());
        }

        Ok(vectors)
    }

    /// Run the embedding call on a worker thread and wait for it within the guard's bounds
    ///
    /// On expiry the worker is detached; its late result is discarded.
    fn embed_on_worker(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let (tx, rx) = mpsc::sync_channel(1);
        let embedder = Arc::clone(&self.embedder);
        thread::Builder::new()
            .name("coderag-embed".to_string())
            .spawn(move || {
                let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                let _ = tx.send(embedder.embed(&refs));
            })
            .map_err(|e| EmbedderError::EmbedError(format!("failed to spawn embedding worker: {}", e)))?;

        let deadline = self.guard.timeout.map(|timeout| (Instant::now() + timeout, timeout));
        loop {
            if self.guard.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                return Err(EmbedderError::Cancelled);
            }

            let mut wait = CANCEL_POLL_INTERVAL;
            if let Some((at, timeout)) = deadline {
                let remaining = at.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(EmbedderError::Timeout(timeout));
                }
                if self.guard.cancel.is_none() || remaining < wait {
                    wait = remaining;
                }
            }

            match rx.recv_timeout(wait) {
                Ok(result) => return result,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(EmbedderError::EmbedError("embedding worker panicked".to_string()))
                }
            }
        }
    }
}
