//! In-memory store implementations for testing and embedding in other hosts.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Vector search is brute-force over the rows of the queried project.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::embedding::SimilarityMetric;
use crate::error::StoreError;
use crate::identity::project_hash;
use crate::models::{
    AnalyzerProjectContext, BatchFailure, ScoredRecord, StoreReport, StoredProjectContext,
    VectorRecord,
};

use super::{rank_candidates, ContextStore, VectorQuery, VectorStore};

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

/// In-memory [`VectorStore`].
pub struct InMemoryVectorStore {
    dims: usize,
    metric: SimilarityMetric,
    rows: RwLock<Vec<VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new(dims: usize, metric: SimilarityMetric) -> Self {
        Self {
            dims,
            metric,
            rows: RwLock::new(Vec::new()),
        }
    }

    /// Total rows across all projects.
    pub fn len(&self) -> usize {
        self.rows.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn dims(&self) -> usize {
        self.dims
    }

    fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    async fn store(&self, rows: &[VectorRecord]) -> StoreReport {
        let mut report = StoreReport::default();
        let mut guard = match self.rows.write() {
            Ok(g) => g,
            Err(_) => {
                report.errors.push(BatchFailure {
                    file_paths: rows.iter().map(|r| r.file_path.clone()).collect(),
                    message: "in-memory store lock poisoned".to_string(),
                });
                return report;
            }
        };
        for row in rows {
            if row.embedding.len() != self.dims {
                let err = StoreError::DimensionMismatch {
                    expected: self.dims,
                    actual: row.embedding.len(),
                };
                report.errors.push(BatchFailure {
                    file_paths: vec![row.file_path.clone()],
                    message: err.to_string(),
                });
                continue;
            }
            guard.push(row.clone());
            report.stored_count += 1;
        }
        report
    }

    async fn query(&self, query: &VectorQuery<'_>) -> Result<Vec<ScoredRecord>> {
        if query.embedding.len() != self.dims {
            return Err(StoreError::DimensionMismatch {
                expected: self.dims,
                actual: query.embedding.len(),
            }
            .into());
        }
        let rows = self.rows.read().map_err(poisoned)?;
        let scored: Vec<ScoredRecord> = rows
            .iter()
            .filter(|r| r.project_id == query.project_id)
            .filter(|r| query.user_id.map_or(true, |u| r.user_id == u))
            .map(|r| ScoredRecord {
                similarity: self.metric.score(query.embedding, &r.embedding),
                record: r.clone(),
            })
            .collect();
        Ok(rank_candidates(scored, query.threshold, query.top_k))
    }

    async fn clear(&self, project_id: &str, user_id: &str) -> Result<u64> {
        let mut rows = self.rows.write().map_err(poisoned)?;
        let before = rows.len();
        rows.retain(|r| !(r.project_id == project_id && r.user_id == user_id));
        Ok((before - rows.len()) as u64)
    }

    async fn count(&self, project_id: &str, user_id: &str) -> Result<u64> {
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(rows
            .iter()
            .filter(|r| r.project_id == project_id && r.user_id == user_id)
            .count() as u64)
    }
}

/// In-memory [`ContextStore`] keeping every version.
#[derive(Default)]
pub struct InMemoryContextStore {
    rows: RwLock<Vec<StoredProjectContext>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn store(
        &self,
        user_id: &str,
        project_path: &str,
        context: &AnalyzerProjectContext,
    ) -> Result<StoredProjectContext> {
        let hash = project_hash(project_path);
        let mut rows = self.rows.write().map_err(poisoned)?;
        let previous: Vec<&StoredProjectContext> = rows
            .iter()
            .filter(|r| r.user_id == user_id && r.project_hash == hash)
            .collect();
        let version = previous.iter().map(|r| r.version).max().unwrap_or(0) + 1;
        let now = Utc::now();
        let created_at = previous
            .iter()
            .map(|r| r.created_at)
            .min()
            .unwrap_or(now);

        let stored = StoredProjectContext {
            id: uuid::Uuid::new_v4().to_string(),
            project_path: project_path.to_string(),
            project_hash: hash,
            user_id: user_id.to_string(),
            context: context.clone(),
            created_at,
            updated_at: now,
            version,
        };
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn get_latest(
        &self,
        user_id: &str,
        project_path: &str,
    ) -> Result<Option<StoredProjectContext>> {
        let hash = project_hash(project_path);
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(rows
            .iter()
            .filter(|r| r.user_id == user_id && r.project_hash == hash)
            .max_by_key(|r| r.version)
            .cloned())
    }

    async fn list_projects(&self, user_id: &str) -> Result<Vec<StoredProjectContext>> {
        let rows = self.rows.read().map_err(poisoned)?;
        let mut latest: HashMap<&str, &StoredProjectContext> = HashMap::new();
        for row in rows.iter().filter(|r| r.user_id == user_id) {
            let entry = latest.entry(row.project_hash.as_str()).or_insert(row);
            if row.version > entry.version {
                *entry = row;
            }
        }
        let mut projects: Vec<StoredProjectContext> = latest.into_values().cloned().collect();
        projects.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.project_path.cmp(&b.project_path))
        });
        Ok(projects)
    }

    async fn get_by_id(&self, context_id: &str) -> Result<Option<StoredProjectContext>> {
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(rows.iter().find(|r| r.id == context_id).cloned())
    }

    async fn delete(&self, user_id: &str, project_path: &str) -> Result<u64> {
        let hash = project_hash(project_path);
        let mut rows = self.rows.write().map_err(poisoned)?;
        let before = rows.len();
        rows.retain(|r| !(r.user_id == user_id && r.project_hash == hash));
        Ok((before - rows.len()) as u64)
    }

    async fn versions(
        &self,
        user_id: &str,
        project_path: &str,
    ) -> Result<Vec<StoredProjectContext>> {
        let hash = project_hash(project_path);
        let rows = self.rows.read().map_err(poisoned)?;
        let mut versions: Vec<StoredProjectContext> = rows
            .iter()
            .filter(|r| r.user_id == user_id && r.project_hash == hash)
            .cloned()
            .collect();
        versions.sort_by_key(|r| r.version);
        Ok(versions)
    }
}
