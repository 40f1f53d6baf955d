//! SQLite-backed [`VectorStore`] and [`ContextStore`] implementations.
//!
//! Vectors are stored as little-endian `f32` BLOBs and ranked in-process
//! (brute force over the queried project's rows). The `store_meta` table
//! binds the vector table to one dimensionality and one similarity
//! metric; a mismatching store or query fails with [`StoreError`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use project_context_core::embedding::{blob_to_vec, vec_to_blob, SimilarityMetric};
use project_context_core::error::StoreError;
use project_context_core::identity::project_hash;
use project_context_core::models::{
    AnalyzerProjectContext, BatchFailure, ScoredRecord, StoreReport, StoredProjectContext,
    VectorRecord,
};
use project_context_core::store::{rank_candidates, ContextStore, VectorQuery, VectorStore};

/// Rows per insert transaction unless overridden.
pub const DEFAULT_STORE_BATCH: usize = 100;

const META_DIMS: &str = "dims";
const META_METRIC: &str = "metric";

fn ts_to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn ts_from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn distinct_paths<'a>(rows: impl IntoIterator<Item = &'a VectorRecord>) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for row in rows {
        if !paths.contains(&row.file_path) {
            paths.push(row.file_path.clone());
        }
    }
    paths
}

/// SQLite implementation of [`VectorStore`].
pub struct SqliteVectorStore {
    pool: SqlitePool,
    dims: usize,
    metric: SimilarityMetric,
    batch_size: usize,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool, dims: usize, metric: SimilarityMetric) -> Self {
        Self {
            pool,
            dims,
            metric,
            batch_size: DEFAULT_STORE_BATCH,
        }
    }

    /// Rows per insert transaction (minimum 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn read_meta(&self) -> Result<Option<(usize, String)>> {
        let rows = sqlx::query("SELECT key, value FROM store_meta WHERE key IN (?, ?)")
            .bind(META_DIMS)
            .bind(META_METRIC)
            .fetch_all(&self.pool)
            .await?;

        let mut dims = None;
        let mut metric = None;
        for row in &rows {
            let key: String = row.get("key");
            let value: String = row.get("value");
            match key.as_str() {
                META_DIMS => {
                    dims = Some(
                        value
                            .parse::<usize>()
                            .with_context(|| format!("Corrupt store_meta dims: {}", value))?,
                    )
                }
                META_METRIC => metric = Some(value),
                _ => {}
            }
        }
        Ok(dims.zip(metric))
    }

    async fn write_meta(&self) -> Result<()> {
        let dims = self.dims.to_string();
        for (key, value) in [(META_DIMS, dims.as_str()), (META_METRIC, self.metric.as_str())] {
            sqlx::query(
                r#"
                INSERT INTO store_meta (key, value) VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    fn mismatch(&self, stored_dims: usize, stored_metric: &str) -> Option<StoreError> {
        if stored_dims != self.dims {
            Some(StoreError::DimensionMismatch {
                expected: stored_dims,
                actual: self.dims,
            })
        } else if stored_metric != self.metric.as_str() {
            Some(StoreError::MetricMismatch {
                stored: stored_metric.to_string(),
                configured: self.metric.as_str().to_string(),
            })
        } else {
            None
        }
    }

    /// Ensure the recorded dims/metric match this store's configuration.
    ///
    /// An empty vector table is re-bound to the current configuration, so
    /// switching models only requires clearing the old rows.
    async fn bind_meta(&self) -> Result<()> {
        match self.read_meta().await? {
            None => self.write_meta().await,
            Some((dims, metric)) => match self.mismatch(dims, &metric) {
                None => Ok(()),
                Some(err) => {
                    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_records")
                        .fetch_one(&self.pool)
                        .await?;
                    if total > 0 {
                        return Err(err.into());
                    }
                    debug!(dims = self.dims, metric = %self.metric, "rebinding empty vector table");
                    self.write_meta().await
                }
            },
        }
    }

    async fn insert_batch(&self, batch: &[&VectorRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        for row in batch {
            sqlx::query(
                r#"
                INSERT INTO vector_records (id, project_id, user_id, file_path, chunk_text,
                                            embedding, dims, chunk_sequence_number,
                                            start_offset, end_offset, start_line, end_line,
                                            created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.id)
            .bind(&row.project_id)
            .bind(&row.user_id)
            .bind(&row.file_path)
            .bind(&row.chunk_text)
            .bind(vec_to_blob(&row.embedding))
            .bind(row.embedding.len() as i64)
            .bind(row.chunk_sequence_number)
            .bind(row.start_offset)
            .bind(row.end_offset)
            .bind(row.start_line)
            .bind(row.end_line)
            .bind(ts_to_millis(&row.created_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(batch.len())
    }
}

fn record_from_row(row: &SqliteRow) -> VectorRecord {
    let blob: Vec<u8> = row.get("embedding");
    VectorRecord {
        id: row.get("id"),
        project_id: row.get("project_id"),
        user_id: row.get("user_id"),
        file_path: row.get("file_path"),
        chunk_text: row.get("chunk_text"),
        embedding: blob_to_vec(&blob),
        chunk_sequence_number: row.get("chunk_sequence_number"),
        start_offset: row.get("start_offset"),
        end_offset: row.get("end_offset"),
        start_line: row.get("start_line"),
        end_line: row.get("end_line"),
        created_at: ts_from_millis(row.get("created_at")),
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn dims(&self) -> usize {
        self.dims
    }

    fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    async fn store(&self, rows: &[VectorRecord]) -> StoreReport {
        let mut report = StoreReport::default();
        if rows.is_empty() {
            return report;
        }

        if let Err(e) = self.bind_meta().await {
            report.errors.push(BatchFailure {
                file_paths: distinct_paths(rows),
                message: format!("{:#}", e),
            });
            return report;
        }

        let mut valid: Vec<&VectorRecord> = Vec::with_capacity(rows.len());
        for row in rows {
            if row.embedding.len() == self.dims {
                valid.push(row);
            } else {
                let err = StoreError::DimensionMismatch {
                    expected: self.dims,
                    actual: row.embedding.len(),
                };
                report.errors.push(BatchFailure {
                    file_paths: vec![row.file_path.clone()],
                    message: err.to_string(),
                });
            }
        }

        for (i, batch) in valid.chunks(self.batch_size).enumerate() {
            match self.insert_batch(batch).await {
                Ok(n) => report.stored_count += n,
                Err(e) => {
                    warn!(batch = i, rows = batch.len(), error = %e, "vector sub-batch insert failed");
                    report.errors.push(BatchFailure {
                        file_paths: distinct_paths(batch.iter().copied()),
                        message: format!("{:#}", e),
                    });
                }
            }
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
        if let Some((dims, metric)) = self.read_meta().await? {
            if let Some(err) = self.mismatch(dims, &metric) {
                return Err(err.into());
            }
        }

        let rows = sqlx::query(
            r#"
            SELECT id, project_id, user_id, file_path, chunk_text, embedding,
                   chunk_sequence_number, start_offset, end_offset, start_line, end_line,
                   created_at
            FROM vector_records
            WHERE project_id = ? AND (? IS NULL OR user_id = ?)
            "#,
        )
        .bind(query.project_id)
        .bind(query.user_id)
        .bind(query.user_id)
        .fetch_all(&self.pool)
        .await?;

        let scored: Vec<ScoredRecord> = rows
            .iter()
            .map(record_from_row)
            .filter(|record| record.embedding.len() == self.dims)
            .map(|record| ScoredRecord {
                similarity: self.metric.score(query.embedding, &record.embedding),
                record,
            })
            .collect();

        Ok(rank_candidates(scored, query.threshold, query.top_k))
    }

    async fn clear(&self, project_id: &str, user_id: &str) -> Result<u64> {
        clear_vectors(&self.pool, project_id, user_id).await
    }

    async fn count(&self, project_id: &str, user_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM vector_records WHERE project_id = ? AND user_id = ?",
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }
}

/// Delete every vector row for `(project_id, user_id)`.
///
/// Independent of dims/metric, so `pctx clear` works without an embedding
/// provider configured.
pub async fn clear_vectors(pool: &SqlitePool, project_id: &str, user_id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM vector_records WHERE project_id = ? AND user_id = ?")
        .bind(project_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// SQLite implementation of [`ContextStore`].
pub struct SqliteContextStore {
    pool: SqlitePool,
}

impl SqliteContextStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn context_from_row(row: &SqliteRow) -> Result<StoredProjectContext> {
    let id: String = row.get("id");
    let context_json: String = row.get("context_json");
    let context: AnalyzerProjectContext = serde_json::from_str(&context_json)
        .with_context(|| format!("Corrupt context_json for project context {}", id))?;

    Ok(StoredProjectContext {
        id,
        project_path: row.get("project_path"),
        project_hash: row.get("project_hash"),
        user_id: row.get("user_id"),
        context,
        created_at: ts_from_millis(row.get("created_at")),
        updated_at: ts_from_millis(row.get("updated_at")),
        version: row.get("version"),
    })
}

const CONTEXT_COLUMNS: &str =
    "id, project_path, project_hash, user_id, context_json, created_at, updated_at, version";

#[async_trait]
impl ContextStore for SqliteContextStore {
    async fn store(
        &self,
        user_id: &str,
        project_path: &str,
        context: &AnalyzerProjectContext,
    ) -> Result<StoredProjectContext> {
        let hash = project_hash(project_path);
        let context_json = serde_json::to_string(context)?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let previous = sqlx::query(
            "SELECT MAX(version) AS version, MIN(created_at) AS created_at FROM project_contexts WHERE user_id = ? AND project_hash = ?",
        )
        .bind(user_id)
        .bind(&hash)
        .fetch_one(&mut *tx)
        .await?;
        let last_version: Option<i64> = previous.get("version");
        let first_created: Option<i64> = previous.get("created_at");

        let version = last_version.unwrap_or(0) + 1;
        let created_at = first_created
            .map(ts_from_millis)
            .unwrap_or(now);
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO project_contexts (id, project_path, project_hash, user_id,
                                          context_json, created_at, updated_at, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(project_path)
        .bind(&hash)
        .bind(user_id)
        .bind(&context_json)
        .bind(ts_to_millis(&created_at))
        .bind(ts_to_millis(&now))
        .bind(version)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(project_hash = %hash, version, "stored project context");

        Ok(StoredProjectContext {
            id,
            project_path: project_path.to_string(),
            project_hash: hash,
            user_id: user_id.to_string(),
            context: context.clone(),
            created_at: ts_from_millis(ts_to_millis(&created_at)),
            updated_at: ts_from_millis(ts_to_millis(&now)),
            version,
        })
    }

    async fn get_latest(
        &self,
        user_id: &str,
        project_path: &str,
    ) -> Result<Option<StoredProjectContext>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM project_contexts WHERE user_id = ? AND project_hash = ? ORDER BY version DESC LIMIT 1",
            CONTEXT_COLUMNS
        ))
        .bind(user_id)
        .bind(project_hash(project_path))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(context_from_row).transpose()
    }

    async fn list_projects(&self, user_id: &str) -> Result<Vec<StoredProjectContext>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.project_path, p.project_hash, p.user_id, p.context_json,
                   p.created_at, p.updated_at, p.version
            FROM project_contexts p
            JOIN (
                SELECT project_hash, MAX(version) AS latest
                FROM project_contexts
                WHERE user_id = ?
                GROUP BY project_hash
            ) l ON l.project_hash = p.project_hash AND l.latest = p.version
            WHERE p.user_id = ?
            ORDER BY p.updated_at DESC, p.project_hash ASC
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(context_from_row).collect()
    }

    async fn get_by_id(&self, context_id: &str) -> Result<Option<StoredProjectContext>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM project_contexts WHERE id = ?",
            CONTEXT_COLUMNS
        ))
        .bind(context_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(context_from_row).transpose()
    }

    async fn delete(&self, user_id: &str, project_path: &str) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM project_contexts WHERE user_id = ? AND project_hash = ?")
                .bind(user_id)
                .bind(project_hash(project_path))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn versions(
        &self,
        user_id: &str,
        project_path: &str,
    ) -> Result<Vec<StoredProjectContext>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM project_contexts WHERE user_id = ? AND project_hash = ? ORDER BY version ASC",
            CONTEXT_COLUMNS
        ))
        .bind(user_id)
        .bind(project_hash(project_path))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(context_from_row).collect()
    }
}
