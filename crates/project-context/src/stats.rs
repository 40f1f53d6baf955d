//! Database statistics.
//!
//! Summarizes what's indexed: vector rows per project and owner, the
//! dims/metric the vector table is bound to, and stored project
//! analyses. Used by `pctx stats`.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Vector rows for one `(project_id, user_id)` scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeStats {
    pub project_id: String,
    pub user_id: String,
    pub files: i64,
    pub chunks: i64,
    /// Milliseconds since the epoch of the newest row.
    pub last_indexed: i64,
}

pub async fn scope_stats(pool: &SqlitePool) -> Result<Vec<ScopeStats>> {
    let rows = sqlx::query(
        r#"
        SELECT project_id, user_id,
               COUNT(DISTINCT file_path) AS files,
               COUNT(*) AS chunks,
               MAX(created_at) AS last_indexed
        FROM vector_records
        GROUP BY project_id, user_id
        ORDER BY chunks DESC, project_id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| ScopeStats {
            project_id: row.get("project_id"),
            user_id: row.get("user_id"),
            files: row.get("files"),
            chunks: row.get("chunks"),
            last_indexed: row.get("last_indexed"),
        })
        .collect())
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::open(config).await?;

    let total_vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_records")
        .fetch_one(&pool)
        .await?;
    let total_contexts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM project_contexts")
        .fetch_one(&pool)
        .await?;
    let context_projects: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM (SELECT DISTINCT user_id, project_hash FROM project_contexts)",
    )
    .fetch_one(&pool)
    .await?;
    let meta = sqlx::query("SELECT key, value FROM store_meta ORDER BY key")
        .fetch_all(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Project Context — Database Stats");
    println!("================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    for row in &meta {
        let key: String = row.get("key");
        let value: String = row.get("value");
        println!("  {:<12} {}", format!("{}:", capitalize(&key)), value);
    }
    println!();
    println!("  Vectors:     {}", total_vectors);
    println!(
        "  Contexts:    {} version(s) across {} project(s)",
        total_contexts, context_projects
    );

    let scopes = scope_stats(&pool).await?;
    if !scopes.is_empty() {
        println!();
        println!("  By project:");
        println!(
            "  {:<20} {:<12} {:>6} {:>8}   {}",
            "PROJECT", "USER", "FILES", "CHUNKS", "LAST INDEXED"
        );
        println!("  {}", "-".repeat(72));

        for s in &scopes {
            println!(
                "  {:<20} {:<12} {:>6} {:>8}   {}",
                short_id(&s.project_id),
                s.user_id,
                s.files,
                s.chunks,
                format_ts_iso(s.last_indexed)
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Project ids default to 64-char hashes; show a prefix.
fn short_id(id: &str) -> String {
    if id.chars().count() > 16 {
        format!("{}…", id.chars().take(16).collect::<String>())
    } else {
        id.to_string()
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts_iso(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}
