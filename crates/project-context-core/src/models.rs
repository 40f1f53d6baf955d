//! Core data models used throughout Project Context.
//!
//! These types represent the chunks, vector rows, structured project
//! analyses, and indexing summaries that flow through the indexing and
//! retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A contiguous slice of a file's text, produced by the chunker.
///
/// Offsets are character offsets into the cleaned file content
/// (`start_offset` inclusive, `end_offset` exclusive). Lines are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    pub project_id: String,
    pub file_path: String,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// A [`FileChunk`] with its embedding vector and owning user.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: FileChunk,
    pub user_id: String,
    pub embedding: Vec<f32>,
}

impl EmbeddedChunk {
    /// Convert into the persisted row shape, assigning a fresh id.
    pub fn into_record(self) -> VectorRecord {
        VectorRecord {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: self.chunk.project_id,
            user_id: self.user_id,
            file_path: self.chunk.file_path,
            chunk_text: self.chunk.content,
            embedding: self.embedding,
            chunk_sequence_number: self.chunk.chunk_index as i64,
            start_offset: self.chunk.start_offset as i64,
            end_offset: self.chunk.end_offset as i64,
            start_line: self.chunk.start_line as i64,
            end_line: self.chunk.end_line as i64,
            created_at: Utc::now(),
        }
    }
}

/// One persisted vector row.
#[derive(Debug, Clone, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub file_path: String,
    pub chunk_text: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub chunk_sequence_number: i64,
    pub start_offset: i64,
    pub end_offset: i64,
    pub start_line: i64,
    pub end_line: i64,
    pub created_at: DateTime<Utc>,
}

/// A vector row returned from a similarity query, with its score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredRecord {
    pub record: VectorRecord,
    pub similarity: f32,
}

/// Outcome of a single `VectorStore::store` call.
#[derive(Debug, Clone, Default)]
pub struct StoreReport {
    pub stored_count: usize,
    pub errors: Vec<BatchFailure>,
}

/// A failed row or sub-batch, naming the files it covered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub file_paths: Vec<String>,
    pub message: String,
}

/// A persisted project analysis, one row per version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredProjectContext {
    pub id: String,
    pub project_path: String,
    pub project_hash: String,
    pub user_id: String,
    pub context: AnalyzerProjectContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

/// Structured project analysis produced by the project analyzer.
///
/// Field names serialize in camelCase to match the analyzer's JSON output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerProjectContext {
    #[serde(default)]
    pub technologies: Vec<Technology>,
    #[serde(default)]
    pub architectural_patterns: Vec<Pattern>,
    #[serde(default)]
    pub code_patterns: Vec<Pattern>,
    #[serde(default)]
    pub coding_conventions: Vec<Pattern>,
    #[serde(default)]
    pub file_structure_summary: String,
    #[serde(default)]
    pub best_practices_observed: Vec<String>,
    #[serde(default)]
    pub analysis_metadata: AnalysisMetadata,
}

/// A detected technology (language, framework, library, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Technology {
    pub name: String,
    #[serde(default)]
    pub category: TechnologyCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TechnologyCategory {
    Language,
    Framework,
    Library,
    Database,
    Tool,
    #[default]
    Other,
}

/// A named observation (architectural pattern, code pattern, convention).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetadata {
    pub analyzed_at: DateTime<Utc>,
    /// Overall confidence in `[0.0, 1.0]`.
    pub overall_confidence: f64,
}

impl Default for AnalysisMetadata {
    fn default() -> Self {
        Self {
            analyzed_at: Utc::now(),
            overall_confidence: 0.0,
        }
    }
}

/// Pipeline stage an indexing error was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStage {
    Discover,
    Chunk,
    Embed,
    Store,
    Cancelled,
}

/// A single recorded partial failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingError {
    pub file_path: String,
    pub stage: IndexStage,
    pub message: String,
}

/// Aggregate summary of one indexing run.
///
/// Always returned, even when individual files or batches failed.
/// Invariant: `total_embeddings_stored <= total_chunks_created`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingResult {
    pub project_id: String,
    pub user_id: String,
    pub total_files_processed: usize,
    pub total_chunks_created: usize,
    pub total_embeddings_stored: usize,
    pub errors: Vec<IndexingError>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl IndexingResult {
    pub fn new(project_id: &str, user_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }

    /// Record one error per distinct file path in a failed batch.
    pub fn record_batch(&mut self, stage: IndexStage, file_paths: &[String], message: &str) {
        let mut seen: Vec<&str> = Vec::new();
        for path in file_paths {
            if seen.contains(&path.as_str()) {
                continue;
            }
            seen.push(path);
            self.errors.push(IndexingError {
                file_path: path.clone(),
                stage,
                message: message.to_string(),
            });
        }
    }
}
