//! `pctx context` subcommands: store, show, list, delete.
//!
//! Analyses are imported from the JSON produced by the project analyzer
//! (camelCase `AnalyzerProjectContext`). When the file carries no
//! `analysisMetadata.overallConfidence`, one is derived from an optional
//! top-level `signals` object via [`overall_confidence`].

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;

use project_context_core::confidence::{overall_confidence, AnalysisSignals};
use project_context_core::models::AnalyzerProjectContext;
use project_context_core::store::ContextStore;

use crate::config::Config;
use crate::db;
use crate::index::resolve_project_path;
use crate::sqlite_store::SqliteContextStore;

/// Parse an analyzer JSON document, filling in missing metadata.
pub fn parse_analysis(json: &str) -> Result<AnalyzerProjectContext> {
    let mut value: serde_json::Value =
        serde_json::from_str(json).context("Analysis file is not valid JSON")?;

    let obj = value
        .as_object_mut()
        .context("Analysis file must contain a JSON object")?;

    let signals: Option<AnalysisSignals> = obj
        .remove("signals")
        .map(serde_json::from_value)
        .transpose()
        .context("Invalid 'signals' object")?;
    let technologies = obj
        .get("technologies")
        .and_then(|t| t.as_array())
        .map(|t| t.len())
        .unwrap_or(0);

    let meta = obj
        .entry("analysisMetadata")
        .or_insert_with(|| serde_json::json!({}));
    if let Some(meta) = meta.as_object_mut() {
        meta.entry("analyzedAt")
            .or_insert_with(|| serde_json::json!(Utc::now()));
        if !meta.contains_key("overallConfidence") {
            let signals = signals.unwrap_or(AnalysisSignals {
                technologies_detected: technologies,
                ..Default::default()
            });
            meta.insert(
                "overallConfidence".to_string(),
                serde_json::json!(overall_confidence(&signals)),
            );
        }
    }

    serde_json::from_value(value).context("Analysis file does not match the expected shape")
}

async fn open_store(config: &Config) -> Result<SqliteContextStore> {
    Ok(SqliteContextStore::new(db::open(config).await?))
}

pub async fn run_store(config: &Config, path: &Path, file: &Path, user: &str) -> Result<()> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read analysis file: {}", file.display()))?;
    let context = parse_analysis(&json)?;

    let project_path = resolve_project_path(path);
    let stored = open_store(config)
        .await?
        .store(user, &project_path, &context)
        .await?;

    println!("context {}", stored.project_path);
    println!("  id: {}", stored.id);
    println!("  version: {}", stored.version);
    println!(
        "  confidence: {:.2}",
        stored.context.analysis_metadata.overall_confidence
    );
    println!("ok");
    Ok(())
}

pub async fn run_show(config: &Config, path: &Path, user: &str, history: bool) -> Result<()> {
    let project_path = resolve_project_path(path);
    let store = open_store(config).await?;

    if history {
        let versions = store.versions(user, &project_path).await?;
        println!("{}", serde_json::to_string_pretty(&versions)?);
        return Ok(());
    }

    match store.get_latest(user, &project_path).await? {
        Some(latest) => println!("{}", serde_json::to_string_pretty(&latest)?),
        None => println!("No context stored for {}", project_path),
    }
    Ok(())
}

pub async fn run_list(config: &Config, user: &str) -> Result<()> {
    let projects = open_store(config).await?.list_projects(user).await?;
    if projects.is_empty() {
        println!("No projects for user '{}'", user);
        return Ok(());
    }

    println!("{:<8} {:<20} PROJECT", "VERSION", "UPDATED");
    for p in &projects {
        println!(
            "{:<8} {:<20} {}",
            p.version,
            p.updated_at.format("%Y-%m-%d %H:%M:%S"),
            p.project_path
        );
    }
    Ok(())
}

pub async fn run_delete(config: &Config, path: &Path, user: &str) -> Result<()> {
    let project_path = resolve_project_path(path);
    let removed = open_store(config)
        .await?
        .delete(user, &project_path)
        .await?;
    println!("deleted {} version(s) for {}", removed, project_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_confidence_kept() {
        let ctx = parse_analysis(
            r#"{"technologies": [], "analysisMetadata": {"analyzedAt": "2024-05-01T00:00:00Z", "overallConfidence": 0.42}}"#,
        )
        .unwrap();
        assert!((ctx.analysis_metadata.overall_confidence - 0.42).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_derived_from_signals() {
        let ctx = parse_analysis(
            r#"{"signals": {"manifestFound": true, "technologiesDetected": 1}}"#,
        )
        .unwrap();
        assert!((ctx.analysis_metadata.overall_confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_without_signals_counts_technologies() {
        let ctx = parse_analysis(r#"{"technologies": [{"name": "Go"}]}"#).unwrap();
        assert_eq!(ctx.technologies[0].name, "Go");
        assert!((ctx.analysis_metadata.overall_confidence - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_failed_analysis_floors_confidence() {
        let ctx = parse_analysis(
            r#"{"signals": {"manifestFound": true, "analysisError": true}}"#,
        )
        .unwrap();
        assert!((ctx.analysis_metadata.overall_confidence - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(parse_analysis("[1, 2]").is_err());
        assert!(parse_analysis("not json").is_err());
    }
}
