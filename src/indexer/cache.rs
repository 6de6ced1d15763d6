//! Persistent embedding cache using SQLite
//!
//! Stores embeddings keyed by model and content hash so unchanged chunks are not
//! re-embedded across runs. [`CachedEmbedder`] puts the cache in front of any embedder.

use super::embedder::{Embedder, EmbedderError};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Failed to serialize embedding: {0}")]
    Serialization(String),
    #[error("Failed to create cache directory: {0}")]
    Io(#[from] std::io::Error),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS embeddings (
    model_id TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    dimension INTEGER NOT NULL,
    embedding TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (model_id, content_hash)
);
"#;

/// blake3 hex digest of a text, the cache key within one model
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Embedding cache backed by a SQLite database
pub struct EmbeddingCache {
    conn: Mutex<Connection>,
}

impl EmbeddingCache {
    /// Open (or create) a cache file
    pub fn open(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(db_path)?)
    }

    /// Open a cache that lives only as long as this value
    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up embeddings by content hash; missing hashes are absent from the map
    pub fn get_many(&self, model_id: &str, hashes: &[String]) -> Result<HashMap<String, Vec<f32>>, CacheError> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT embedding FROM embeddings WHERE model_id = ?1 AND content_hash = ?2",
        )?;

        let mut found = HashMap::new();
        for hash in hashes {
            if found.contains_key(hash) {
                continue;
            }
            let raw: Option<String> = stmt
                .query_row(params![model_id, hash], |row| row.get(0))
                .optional()?;
            if let Some(raw) = raw {
                let embedding: Vec<f32> = serde_json::from_str(&raw)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                found.insert(hash.clone(), embedding);
            }
        }

        Ok(found)
    }

    /// Insert or replace embeddings in one transaction
    pub fn put_many(&self, model_id: &str, entries: &[(String, Vec<f32>)]) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                r#"INSERT OR REPLACE INTO embeddings (model_id, content_hash, dimension, embedding)
                   VALUES (?1, ?2, ?3, ?4)"#,
            )?;
            for (hash, embedding) in entries {
                // Store embedding as JSON array
                let embedding_json = serde_json::to_string(embedding)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                stmt.execute(params![model_id, hash, embedding.len() as i64, embedding_json])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Number of cached embeddings across all models
    pub fn len(&self) -> Result<usize, CacheError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    /// Drop every embedding produced by one model
    pub fn remove_model(&self, model_id: &str) -> Result<usize, CacheError> {
        Ok(self
            .conn()
            .execute("DELETE FROM embeddings WHERE model_id = ?1", params![model_id])?)
    }

    pub fn clear(&self) -> Result<usize, CacheError> {
        Ok(self.conn().execute("DELETE FROM embeddings", [])?)
    }
}

/// An embedder that consults an [`EmbeddingCache`] before calling the wrapped model
///
/// Cache failures are logged and treated as misses; they never fail an embedding call.
pub struct CachedEmbedder<E> {
    inner: E,
    cache: EmbeddingCache,
}

impl<E: Embedder> CachedEmbedder<E> {
    pub fn new(inner: E, cache: EmbeddingCache) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }
}

impl<E: Embedder> Embedder for CachedEmbedder<E> {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let model_id = self.inner.model_id();
        let hashes: Vec<String> = texts.iter().map(|text| content_hash(text)).collect();

        let mut known = self.cache.get_many(model_id, &hashes).unwrap_or_else(|e| {
            log::warn!("Embedding cache lookup failed: {}", e);
            HashMap::new()
        });

        // Embed each distinct missing text once
        let mut missing: Vec<(&String, &str)> = Vec::new();
        for (hash, &text) in hashes.iter().zip(texts) {
            if !known.contains_key(hash) && !missing.iter().any(|(h, _)| *h == hash) {
                missing.push((hash, text));
            }
        }

        if !missing.is_empty() {
            let batch: Vec<&str> = missing.iter().map(|(_, text)| *text).collect();
            let fresh = self.inner.embed(&batch)?;
            if fresh.len() != batch.len() {
                return Err(EmbedderError::MalformedOutput(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    fresh.len()
                )));
            }

            let entries: Vec<(String, Vec<f32>)> = missing
                .iter()
                .map(|(hash, _)| (*hash).clone())
                .zip(fresh)
                .collect();
            if let Err(e) = self.cache.put_many(model_id, &entries) {
                log::warn!("Failed to store {} embeddings in cache: {}", entries.len(), e);
            }
            known.extend(entries);
            log::debug!("Embedded {} texts, {} served from cache", batch.len(), texts.len() - batch.len());
        }

        hashes
            .iter()
            .map(|hash| {
                known
                    .get(hash)
                    .cloned()
                    .ok_or_else(|| EmbedderError::MalformedOutput("cache lost an embedding".to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::embedder::HashingEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        inner: HashingEmbedder,
        texts_embedded: AtomicUsize,
    }

    impl Embedder for CountingEmbedder {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
            self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
            self.inner.embed(texts)
        }
    }

    fn counting() -> CountingEmbedder {
        CountingEmbedder {
            inner: HashingEmbedder::new(16).unwrap(),
            texts_embedded: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_put_and_get_round_trip() {
        let cache = EmbeddingCache::open_in_memory().unwrap();
        let hash = content_hash("fn main() {}");
        cache.put_many("model-a", &[(hash.clone(), vec![0.5, -1.0])]).unwrap();

        let found = cache.get_many("model-a", &[hash.clone()]).unwrap();
        assert_eq!(found.get(&hash), Some(&vec![0.5, -1.0]));
        assert!(cache.get_many("model-b", &[hash]).unwrap().is_empty());
    }

    #[test]
    fn test_cached_embedder_skips_known_texts() {
        let embedder = CachedEmbedder::new(counting(), EmbeddingCache::open_in_memory().unwrap());

        let first = embedder.embed(&["alpha", "beta", "alpha"]).unwrap();
        assert_eq!(embedder.inner.texts_embedded.load(Ordering::SeqCst), 2);

        let second = embedder.embed(&["beta", "alpha", "gamma"]).unwrap();
        assert_eq!(embedder.inner.texts_embedded.load(Ordering::SeqCst), 3);

        assert_eq!(first[0], first[2]);
        assert_eq!(first[1], second[0]);
        assert_eq!(first[0], second[1]);
        assert_eq!(embedder.cache().len().unwrap(), 3);
    }

    #[test]
    fn test_cached_embedder_matches_uncached_output() {
        let plain = HashingEmbedder::new(16).unwrap();
        let cached = CachedEmbedder::new(HashingEmbedder::new(16).unwrap(), EmbeddingCache::open_in_memory().unwrap());
        let texts = ["struct Config", "impl Config"];

        assert_eq!(plain.embed(&texts).unwrap(), cached.embed(&texts).unwrap());
        assert_eq!(plain.embed(&texts).unwrap(), cached.embed(&texts).unwrap());
    }

    #[test]
    fn test_cache_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("embeddings.db");
        {
            let cache = EmbeddingCache::open(&path).unwrap();
            cache.put_many("m", &[("h1".to_string(), vec![1.0])]).unwrap();
        }

        let reopened = EmbeddingCache::open(&path).unwrap();
        assert_eq!(reopened.len().unwrap(), 1);
        assert_eq!(reopened.remove_model("m").unwrap(), 1);
        assert!(reopened.is_empty().unwrap());
    }
}
