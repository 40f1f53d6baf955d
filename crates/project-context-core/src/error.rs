//! Typed errors for the conditions callers need to tell apart.

use thiserror::Error;

/// Invalid chunking parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("invalid chunk window: chunk_size={chunk_size}, overlap={overlap} (need 0 <= overlap < chunk_size)")]
    InvalidWindow { chunk_size: usize, overlap: usize },
}

/// Configuration mismatches detected by a vector store.
///
/// These are never silently tolerated: a vector of the wrong length or a
/// query under a different similarity convention would corrupt ranking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("embedding dimension mismatch: store expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("similarity metric mismatch: store was written with '{stored}', configured '{configured}'")]
    MetricMismatch { stored: String, configured: String },
}
