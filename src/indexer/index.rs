//! In-memory exact nearest-neighbour index
//!
//! Stores chunk embeddings and answers k-nearest-neighbour queries. The entry list
//! is an immutable snapshot behind an `Arc`; `rebuild` swaps in a new snapshot, so a
//! concurrent `search` sees either the old entries or the new ones, never a mix.

use super::error::RetrievalError;
use super::{Chunk, SearchResult};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

/// Distance used to rank entries against a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistanceMetric {
    #[default]
    SquaredEuclidean,
    /// 1 - cosine similarity; a zero vector is at distance 1 from everything
    Cosine,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::SquaredEuclidean => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            DistanceMetric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 1.0;
                }
                1.0 - dot / (norm_a * norm_b)
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::SquaredEuclidean => "squared-euclidean",
            DistanceMetric::Cosine => "cosine",
        }
    }
}

/// One chunk and its embedding
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Vector index for chunk embeddings
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    metric: DistanceMetric,
    entries: RwLock<Arc<Vec<IndexEntry>>>,
}

impl VectorIndex {
    /// Create an empty index with a fixed dimension
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            dimension,
            metric,
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Replace the entire index contents
    ///
    /// Entry order is the tie-break order for equal distances. Nothing is replaced
    /// if any vector has the wrong dimension.
    pub fn rebuild(&self, entries: Vec<(Chunk, Vec<f32>)>) -> Result<(), RetrievalError> {
        if let Some((_, bad)) = entries.iter().find(|(_, v)| v.len() != self.dimension) {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        let snapshot: Vec<IndexEntry> = entries
            .into_iter()
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();
        let count = snapshot.len();

        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
        log::debug!("Rebuilt vector index with {} entries", count);
        Ok(())
    }

    /// Search for the `k` nearest chunks, most similar first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Chunk>, RetrievalError> {
        Ok(self
            .search_scored(query, k)?
            .into_iter()
            .map(|result| result.chunk)
            .collect())
    }

    /// Search for the `k` nearest chunks with their distances
    ///
    /// Ties keep insertion order; `k` larger than the entry count returns every entry.
    pub fn search_scored(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, RetrievalError> {
        if query.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(vec![]);
        }

        let snapshot = self.snapshot();
        let mut scored: Vec<(usize, f32)> = snapshot
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, self.metric.distance(query, &entry.embedding)))
            .collect();

        // Stable sort keeps insertion order among equal distances
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, distance)| SearchResult {
                chunk: snapshot[position].chunk.clone(),
                distance,
            })
            .collect())
    }

    fn snapshot(&self) -> Arc<Vec<IndexEntry>> {
        Arc::clone(&self.entries.read().unwrap_or_else(PoisonError::into_inner))
    }
}
