use anyhow::{bail, Result};
use async_trait::async_trait;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use project_context::config::IndexingConfig;
use project_context::db;
use project_context::discover::DiscoveryFilter;
use project_context::gateway::{EmbeddingGateway, ModelHandle};
use project_context::index::{IndexOptions, IndexSettings, IndexingPipeline};
use project_context::migrate;
use project_context::sqlite_store::SqliteVectorStore;
use project_context_core::embedding::{EmbeddingBackend, SimilarityMetric};
use project_context_core::models::{
    BatchFailure, IndexStage, ScoredRecord, StoreReport, VectorRecord,
};
use project_context_core::store::{VectorQuery, VectorStore};

const DIMS: usize = 4;

/// Deterministic embedder: fails on any text containing `POISON`,
/// optionally sleeping before each call.
struct TestEmbedder {
    delay: Option<Duration>,
}

fn vector_for(text: &str) -> Vec<f32> {
    let vowels = text.chars().filter(|c| "aeiou".contains(*c)).count() as f32;
    vec![1.0, text.len() as f32, vowels, 0.5]
}

#[async_trait]
impl EmbeddingBackend for TestEmbedder {
    fn model_name(&self) -> &str {
        "test"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if texts.iter().any(|t| t.contains("POISON")) {
            bail!("backend rejected input");
        }
        Ok(texts.iter().map(|t| vector_for(t)).collect())
    }
}

async fn sqlite_store(tmp: &TempDir) -> Arc<SqliteVectorStore> {
    let pool = db::connect_path(&tmp.path().join("data/pctx.sqlite"))
        .await
        .unwrap();
    migrate::apply(&pool).await.unwrap();
    Arc::new(SqliteVectorStore::new(pool, DIMS, SimilarityMetric::Cosine).with_batch_size(2))
}

/// Wraps a real store and refuses every row of one file.
struct RejectingStore {
    inner: Arc<SqliteVectorStore>,
    reject: &'static str,
}

#[async_trait]
impl VectorStore for RejectingStore {
    fn dims(&self) -> usize {
        self.inner.dims()
    }

    fn metric(&self) -> SimilarityMetric {
        self.inner.metric()
    }

    async fn store(&self, rows: &[VectorRecord]) -> StoreReport {
        let (rejected, kept): (Vec<VectorRecord>, Vec<VectorRecord>) = rows
            .iter()
            .cloned()
            .partition(|r| r.file_path == self.reject);
        let mut report = self.inner.store(&kept).await;
        if !rejected.is_empty() {
            report.errors.push(BatchFailure {
                file_paths: vec![self.reject.to_string()],
                message: "UNIQUE constraint failed: vector_records.id".to_string(),
            });
        }
        report
    }

    async fn query(&self, query: &VectorQuery<'_>) -> Result<Vec<ScoredRecord>> {
        self.inner.query(query).await
    }

    async fn clear(&self, project_id: &str, user_id: &str) -> Result<u64> {
        self.inner.clear(project_id, user_id).await
    }

    async fn count(&self, project_id: &str, user_id: &str) -> Result<u64> {
        self.inner.count(project_id, user_id).await
    }
}

fn pipeline(store: Arc<dyn VectorStore>, delay: Option<Duration>) -> IndexingPipeline {
    let backend = Arc::new(TestEmbedder { delay });
    IndexingPipeline::new(
        EmbeddingGateway::new(Arc::new(ModelHandle::from_backend(backend))),
        store,
        DiscoveryFilter::from_config(&IndexingConfig::default()).unwrap(),
        IndexSettings {
            chunk_size: 200,
            overlap: 20,
            embed_batch_size: 1,
            store_batch_size: 2,
        },
    )
}

fn write_project(root: &std::path::Path) {
    fs::create_dir_all(root.join("src")).unwrap();
    fs::create_dir_all(root.join("node_modules/dep")).unwrap();
    fs::write(root.join("a.md"), "# Alpha\n\nConfiguration is loaded from TOML.").unwrap();
    fs::write(root.join("b.md"), "POISON pill that the embedder refuses.").unwrap();
    fs::write(root.join("src/main.rs"), "fn main() {\n    println!(\"hi\");\n}\n").unwrap();
    fs::write(root.join("node_modules/dep/index.js"), "module.exports = 1;").unwrap();
}

#[tokio::test]
async fn test_failed_batch_is_excluded_and_named() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path().join("project");
    write_project(&project);
    let store = sqlite_store(&tmp).await;

    let result = pipeline(store.clone(), None)
        .run(&project, "proj", "alice", &IndexOptions::default())
        .await
        .unwrap();

    assert_eq!(result.total_files_processed, 3);
    assert_eq!(result.total_chunks_created, 3);
    assert_eq!(result.total_embeddings_stored, 2);
    assert!(!result.cancelled);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].file_path, "b.md");
    assert_eq!(result.errors[0].stage, IndexStage::Embed);
    assert_eq!(store.count("proj", "alice").await.unwrap(), 2);
}

#[tokio::test]
async fn test_store_failure_is_recorded_and_others_commit() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path().join("project");
    write_project(&project);
    fs::remove_file(project.join("b.md")).unwrap();
    fs::write(project.join("dup.rs"), "pub const ID: &str = \"same\";\n").unwrap();
    let inner = sqlite_store(&tmp).await;
    let store = Arc::new(RejectingStore {
        inner: inner.clone(),
        reject: "dup.rs",
    });

    let result = pipeline(store, None)
        .run(&project, "proj", "alice", &IndexOptions::default())
        .await
        .unwrap();

    assert_eq!(result.total_files_processed, 3);
    assert_eq!(result.total_embeddings_stored, 2);
    let failed: Vec<&str> = result
        .errors
        .iter()
        .filter(|e| e.stage == IndexStage::Store)
        .map(|e| e.file_path.as_str())
        .collect();
    assert_eq!(failed, vec!["dup.rs"]);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(inner.count("proj", "alice").await.unwrap(), 2);
}

#[tokio::test]
async fn test_full_reindex_replaces_rows() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path().join("project");
    write_project(&project);
    fs::remove_file(project.join("b.md")).unwrap();
    let store = sqlite_store(&tmp).await;
    let pipeline = pipeline(store.clone(), None);

    let options = IndexOptions {
        full: true,
        ..Default::default()
    };
    let first = pipeline.run(&project, "proj", "alice", &options).await.unwrap();
    let second = pipeline.run(&project, "proj", "alice", &options).await.unwrap();

    assert!(first.errors.is_empty());
    assert_eq!(first.total_embeddings_stored, second.total_embeddings_stored);
    assert_eq!(
        store.count("proj", "alice").await.unwrap(),
        second.total_embeddings_stored as u64
    );
}

#[tokio::test]
async fn test_rows_are_scoped_to_owner() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path().join("project");
    write_project(&project);
    let store = sqlite_store(&tmp).await;
    let pipeline = pipeline(store.clone(), None);

    pipeline
        .run(&project, "proj", "alice", &IndexOptions::default())
        .await
        .unwrap();
    assert_eq!(store.count("proj", "bob").await.unwrap(), 0);

    let target = vector_for("# Alpha\n\nConfiguration is loaded from TOML.");
    let hits = store
        .query(&VectorQuery {
            embedding: &target,
            project_id: "proj",
            user_id: Some("bob"),
            top_k: 5,
            threshold: 0.0,
        })
        .await
        .unwrap();
    assert!(hits.is_empty());

    let hits = store
        .query(&VectorQuery {
            embedding: &target,
            project_id: "proj",
            user_id: Some("alice"),
            top_k: 5,
            threshold: 0.0,
        })
        .await
        .unwrap();
    assert!(hits.iter().any(|h| h.record.file_path == "a.md"));
    assert!(hits.iter().all(|h| h.record.user_id == "alice"));
}

#[tokio::test]
async fn test_timeout_cancels_remaining_work() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path().join("project");
    write_project(&project);
    let store = sqlite_store(&tmp).await;

    let options = IndexOptions {
        timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    };
    let result = pipeline(store.clone(), Some(Duration::from_millis(500)))
        .run(&project, "proj", "alice", &options)
        .await
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(result.total_embeddings_stored, 0);
    assert!(result
        .errors
        .iter()
        .any(|e| e.stage == IndexStage::Cancelled));
    assert_eq!(store.count("proj", "alice").await.unwrap(), 0);
}
