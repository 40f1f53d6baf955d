//! Database schema migrations.
//!
//! All statements are idempotent (`IF NOT EXISTS`), so running them on
//! every open is safe.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Entry point for `pctx init`.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an existing pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Embedded chunks
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_records (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            chunk_text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            chunk_sequence_number INTEGER NOT NULL,
            start_offset INTEGER NOT NULL,
            end_offset INTEGER NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Versioned project analyses
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project_contexts (
            id TEXT PRIMARY KEY,
            project_path TEXT NOT NULL,
            project_hash TEXT NOT NULL,
            user_id TEXT NOT NULL,
            context_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            version INTEGER NOT NULL,
            UNIQUE(user_id, project_hash, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Dims and metric the vector table is bound to
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vector_records_scope ON vector_records(project_id, user_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_project_contexts_owner ON project_contexts(user_id, project_hash)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
