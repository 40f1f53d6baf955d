//! Storage abstractions for Project Context.
//!
//! Two durable stores back the retrieval pipeline:
//!
//! | Trait | Rows | Purpose |
//! |-------|------|---------|
//! | [`VectorStore`] | [`VectorRecord`] | Nearest-neighbour retrieval over file chunks |
//! | [`ContextStore`] | [`StoredProjectContext`] | Versioned structured project analyses |
//!
//! The two are independent: a write to one never coordinates with the
//! other. Implementations must be `Send + Sync` to work with async
//! runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::SimilarityMetric;
use crate::models::{AnalyzerProjectContext, ScoredRecord, StoreReport, StoredProjectContext, VectorRecord};

/// Parameters of a single nearest-neighbour query.
#[derive(Debug, Clone)]
pub struct VectorQuery<'a> {
    pub embedding: &'a [f32],
    /// Minimum similarity (inclusive) for a row to be returned.
    pub threshold: f32,
    /// Maximum number of rows to return.
    pub top_k: usize,
    pub project_id: &'a str,
    /// Restrict to one owner; `None` matches every owner of the project.
    pub user_id: Option<&'a str>,
}

/// Vector-capable store of embedded chunks.
///
/// A store is bound to one embedding dimensionality and one
/// [`SimilarityMetric`]. Writes with a different vector length are
/// rejected per row; queries with a different length fail with
/// [`StoreError::DimensionMismatch`](crate::error::StoreError).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Dimensionality every stored vector must have.
    fn dims(&self) -> usize;

    /// Similarity convention used for ranking.
    fn metric(&self) -> SimilarityMetric;

    /// Insert rows. Never fails wholesale: failures are reported per row
    /// or per sub-batch in the returned [`StoreReport`].
    async fn store(&self, rows: &[VectorRecord]) -> StoreReport;

    /// Rows with similarity `>= threshold`, best first, at most `top_k`.
    async fn query(&self, query: &VectorQuery<'_>) -> Result<Vec<ScoredRecord>>;

    /// Delete every row for `(project_id, user_id)`. Returns rows removed.
    async fn clear(&self, project_id: &str, user_id: &str) -> Result<u64>;

    /// Number of rows for `(project_id, user_id)`.
    async fn count(&self, project_id: &str, user_id: &str) -> Result<u64>;
}

/// Versioned store of structured project analyses.
///
/// Rows are keyed by `(user_id, project_hash)`; each `store` call adds the
/// next version, so versions form the contiguous sequence `1..=n` and the
/// latest is the one with the highest version. Callers serialize `store`
/// calls for the same project and user.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Persist a new version of the analysis for this project and user.
    async fn store(
        &self,
        user_id: &str,
        project_path: &str,
        context: &AnalyzerProjectContext,
    ) -> Result<StoredProjectContext>;

    /// The highest version for the project, if any.
    async fn get_latest(
        &self,
        user_id: &str,
        project_path: &str,
    ) -> Result<Option<StoredProjectContext>>;

    /// Latest version of every project the user owns, most recently updated first.
    async fn list_projects(&self, user_id: &str) -> Result<Vec<StoredProjectContext>>;

    /// Direct lookup by row id. Does not check ownership.
    async fn get_by_id(&self, context_id: &str) -> Result<Option<StoredProjectContext>>;

    /// Remove every version for the project. Returns rows removed.
    async fn delete(&self, user_id: &str, project_path: &str) -> Result<u64>;

    /// Every version for the project, ascending.
    async fn versions(&self, user_id: &str, project_path: &str)
        -> Result<Vec<StoredProjectContext>>;
}

/// Rank scored rows best-first, apply threshold and cap.
///
/// Shared by store implementations that compute similarity in-process.
pub fn rank_candidates(mut scored: Vec<ScoredRecord>, threshold: f32, top_k: usize) -> Vec<ScoredRecord> {
    scored.retain(|s| s.similarity >= threshold);
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record.file_path.cmp(&b.record.file_path))
            .then_with(|| {
                a.record
                    .chunk_sequence_number
                    .cmp(&b.record.chunk_sequence_number)
            })
    });
    scored.truncate(top_k);
    scored
}
