//! Crate-level retrieval errors
//!
//! Module-specific failures (`EmbedderError`, `CacheError`, `ScanError`) live next to
//! the code that produces them and fold into [`RetrievalError`] at the retrieval boundary.

use super::embedder::EmbedderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    /// A size or count parameter was out of range. Programmer error, never retried.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// A vector's length disagrees with the index dimension.
    #[error("Dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// The embedding backend failed, timed out, or returned malformed output.
    /// Callers may retry with backoff; distinct from an empty successful result.
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),
}

impl From<EmbedderError> for RetrievalError {
    fn from(err: EmbedderError) -> Self {
        RetrievalError::RetrievalUnavailable(err.to_string())
    }
}

impl RetrievalError {
    /// Whether a caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetrievalError::RetrievalUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_display() {
        let err = RetrievalError::DimensionMismatch {
            expected: 384,
            actual: 128,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: index expects 384, got 128");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_embedder_error_becomes_unavailable() {
        let err: RetrievalError = EmbedderError::EmbedError("backend down".to_string()).into();
        assert!(matches!(err, RetrievalError::RetrievalUnavailable(_)));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("backend down"));
    }
}
