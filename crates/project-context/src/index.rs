//! Indexing pipeline: Discover → Chunk → Embed → Store.
//!
//! Each stage is independently fallible per item. A file that cannot be
//! read, a batch that cannot be embedded, or a sub-batch that cannot be
//! written is recorded in [`IndexingResult::errors`] and the run moves on.
//! The only hard failures are the [`IndexError`] preconditions.
//!
//! Batches are processed one at a time. Cancellation (token or timeout)
//! is observed between items and while waiting on the embedding backend;
//! everything not yet stored is then recorded with
//! [`IndexStage::Cancelled`].

use anyhow::Result;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use project_context_core::chunk::chunk_content;
use project_context_core::error::ChunkError;
use project_context_core::identity::project_hash;
use project_context_core::models::{
    EmbeddedChunk, FileChunk, IndexStage, IndexingError, IndexingResult, VectorRecord,
};
use project_context_core::store::VectorStore;

use crate::config::Config;
use crate::db;
use crate::discover::{content_type_hint, discover, DiscoveryFilter};
use crate::embedding::configured_dims;
use crate::gateway::{EmbeddingGateway, ModelHandle};
use crate::progress::{IndexProgressEvent, IndexProgressReporter, NoProgress, ProgressMode};
use crate::sqlite_store::{clear_vectors, SqliteVectorStore};

/// Preconditions whose violation aborts the whole run.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("project path does not exist: {}", .0.display())]
    ProjectNotFound(PathBuf),

    #[error("project path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error(transparent)]
    InvalidWindow(#[from] ChunkError),
}

/// Tunables for one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSettings {
    pub chunk_size: usize,
    pub overlap: usize,
    pub embed_batch_size: usize,
    pub store_batch_size: usize,
}

impl IndexSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunking.chunk_size,
            overlap: config.chunking.overlap,
            embed_batch_size: config.indexing.embed_batch_size,
            store_batch_size: config.indexing.store_batch_size,
        }
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
            embed_batch_size: 50,
            store_batch_size: 100,
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Clear the project's rows for this user before indexing.
    pub full: bool,
    pub cancel: CancellationToken,
    pub timeout: Option<Duration>,
}

/// Stop condition shared by every stage of a run.
struct StopSignal {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl StopSignal {
    fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    async fn stopped(&self) {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {}
            },
            None => self.cancel.cancelled().await,
        }
    }

    /// Run `fut` unless the run is stopped first.
    async fn race<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            out = fut => Some(out),
            _ = self.stopped() => None,
        }
    }
}

pub struct IndexingPipeline {
    gateway: EmbeddingGateway,
    store: Arc<dyn VectorStore>,
    filter: DiscoveryFilter,
    settings: IndexSettings,
    reporter: Box<dyn IndexProgressReporter>,
}

impl IndexingPipeline {
    pub fn new(
        gateway: EmbeddingGateway,
        store: Arc<dyn VectorStore>,
        filter: DiscoveryFilter,
        settings: IndexSettings,
    ) -> Self {
        Self {
            gateway,
            store,
            filter,
            settings,
            reporter: Box::new(NoProgress),
        }
    }

    pub fn with_reporter(mut self, reporter: Box<dyn IndexProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Index the project at `root` for `(project_id, user_id)`.
    pub async fn run(
        &self,
        root: &Path,
        project_id: &str,
        user_id: &str,
        options: &IndexOptions,
    ) -> Result<IndexingResult, IndexError> {
        if !root.exists() {
            return Err(IndexError::ProjectNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(IndexError::NotADirectory(root.to_path_buf()));
        }
        if self.settings.overlap >= self.settings.chunk_size {
            return Err(ChunkError::InvalidWindow {
                chunk_size: self.settings.chunk_size,
                overlap: self.settings.overlap,
            }
            .into());
        }

        let started = Instant::now();
        let stop = StopSignal {
            cancel: options.cancel.clone(),
            deadline: options.timeout.map(|t| started + t),
        };
        let mut result = IndexingResult::new(project_id, user_id);

        if options.full {
            match self.store.clear(project_id, user_id).await {
                Ok(removed) => info!(project_id, user_id, removed, "cleared previous index"),
                Err(e) => {
                    warn!(project_id, error = %e, "clear before full index failed");
                    result.errors.push(IndexingError {
                        file_path: String::new(),
                        stage: IndexStage::Store,
                        message: format!("clear failed: {:#}", e),
                    });
                }
            }
        }

        // Discover
        self.reporter.report(IndexProgressEvent::Discovering {
            project: root.display().to_string(),
        });
        let discovery = discover(root, &self.filter);
        self.reporter.report(IndexProgressEvent::Discovered {
            files: discovery.files.len() as u64,
            skipped: discovery.skipped as u64,
        });
        result.errors.extend(discovery.errors);

        // Chunk
        let total_files = discovery.files.len();
        let mut chunks: Vec<FileChunk> = Vec::new();
        for (i, file) in discovery.files.iter().enumerate() {
            if stop.is_stopped() {
                let remaining: Vec<String> = discovery.files[i..]
                    .iter()
                    .map(|f| f.relative_path.clone())
                    .collect();
                self.cancel(&mut result, &remaining, "chunking");
                break;
            }

            let bytes = match tokio::fs::read(&file.path).await {
                Ok(b) => b,
                Err(e) => {
                    debug!(file = %file.relative_path, error = %e, "read failed");
                    result.errors.push(IndexingError {
                        file_path: file.relative_path.clone(),
                        stage: IndexStage::Chunk,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            let content = String::from_utf8_lossy(&bytes);
            let hint = content_type_hint(&file.relative_path);

            match chunk_content(
                project_id,
                &file.relative_path,
                &content,
                self.settings.chunk_size,
                self.settings.overlap,
            ) {
                Ok(file_chunks) => {
                    debug!(file = %file.relative_path, hint, chunks = file_chunks.len(), "chunked");
                    result.total_files_processed += 1;
                    chunks.extend(file_chunks);
                }
                Err(e) => result.errors.push(IndexingError {
                    file_path: file.relative_path.clone(),
                    stage: IndexStage::Chunk,
                    message: e.to_string(),
                }),
            }

            self.reporter.report(IndexProgressEvent::Chunking {
                n: (i + 1) as u64,
                total: total_files as u64,
            });
        }
        result.total_chunks_created = chunks.len();

        // Embed
        let embedded = if result.cancelled {
            self.cancel_chunks(&mut result, &chunks, "embedding");
            Vec::new()
        } else {
            self.embed_stage(&chunks, user_id, &stop, &mut result).await
        };

        // Store
        if !result.cancelled {
            let records: Vec<VectorRecord> =
                embedded.into_iter().map(EmbeddedChunk::into_record).collect();
            self.store_stage(&records, &stop, &mut result).await;
        } else if !embedded.is_empty() {
            let paths: Vec<String> = embedded.iter().map(|e| e.chunk.file_path.clone()).collect();
            result.record_batch(IndexStage::Cancelled, &paths, "cancelled before storing");
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        self.reporter.report(IndexProgressEvent::Done {
            stored: result.total_embeddings_stored as u64,
            errors: result.errors.len() as u64,
        });
        info!(
            project_id,
            user_id,
            files = result.total_files_processed,
            chunks = result.total_chunks_created,
            stored = result.total_embeddings_stored,
            errors = result.errors.len(),
            cancelled = result.cancelled,
            "indexing finished"
        );

        Ok(result)
    }

    async fn embed_stage(
        &self,
        chunks: &[FileChunk],
        user_id: &str,
        stop: &StopSignal,
        result: &mut IndexingResult,
    ) -> Vec<EmbeddedChunk> {
        let mut embedded = Vec::with_capacity(chunks.len());
        let batch_size = self.settings.embed_batch_size.max(1);
        let total = chunks.len() as u64;

        for (i, batch) in chunks.chunks(batch_size).enumerate() {
            let offset = i * batch_size;
            if stop.is_stopped() {
                self.cancel_chunks(result, &chunks[offset..], "embedding");
                break;
            }

            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let outcome = match stop.race(self.gateway.embed(&texts)).await {
                Some(outcome) => outcome,
                None => {
                    self.cancel_chunks(result, &chunks[offset..], "embedding");
                    break;
                }
            };

            let paths = || batch.iter().map(|c| c.file_path.clone()).collect::<Vec<_>>();
            match outcome {
                Some(vectors) if vectors.is_complete() => {
                    embedded.extend(batch.iter().zip(vectors.vectors).map(|(chunk, embedding)| {
                        EmbeddedChunk {
                            chunk: chunk.clone(),
                            user_id: user_id.to_string(),
                            embedding,
                        }
                    }));
                }
                Some(vectors) => {
                    let message = format!(
                        "embedded {} of {} chunks; batch skipped",
                        vectors.returned(),
                        vectors.requested
                    );
                    warn!(batch = i, %message, "partial embedding batch");
                    result.record_batch(IndexStage::Embed, &paths(), &message);
                }
                None => {
                    warn!(batch = i, chunks = batch.len(), "embedding batch failed");
                    result.record_batch(
                        IndexStage::Embed,
                        &paths(),
                        "embedding capability returned no vectors",
                    );
                }
            }

            self.reporter.report(IndexProgressEvent::Embedding {
                n: (offset + batch.len()) as u64,
                total,
            });
        }

        embedded
    }

    async fn store_stage(
        &self,
        records: &[VectorRecord],
        stop: &StopSignal,
        result: &mut IndexingResult,
    ) {
        let batch_size = self.settings.store_batch_size.max(1);
        let total = records.len() as u64;

        for (i, batch) in records.chunks(batch_size).enumerate() {
            let offset = i * batch_size;
            if stop.is_stopped() {
                let remaining: Vec<String> = records[offset..]
                    .iter()
                    .map(|r| r.file_path.clone())
                    .collect();
                self.cancel(result, &remaining, "storing");
                break;
            }

            let report = self.store.store(batch).await;
            result.total_embeddings_stored += report.stored_count;
            for failure in &report.errors {
                warn!(batch = i, error = %failure.message, "store sub-batch failed");
                result.record_batch(IndexStage::Store, &failure.file_paths, &failure.message);
            }

            self.reporter.report(IndexProgressEvent::Storing {
                n: (offset + batch.len()) as u64,
                total,
            });
        }
    }

    fn cancel_chunks(&self, result: &mut IndexingResult, remaining: &[FileChunk], stage: &str) {
        let paths: Vec<String> = remaining.iter().map(|c| c.file_path.clone()).collect();
        self.cancel(result, &paths, stage);
    }

    fn cancel(&self, result: &mut IndexingResult, remaining: &[String], stage: &str) {
        if !result.cancelled {
            warn!(stage, remaining = remaining.len(), "indexing cancelled");
        }
        result.cancelled = true;
        result.record_batch(
            IndexStage::Cancelled,
            remaining,
            &format!("cancelled before {}", stage),
        );
    }
}

/// Canonical string form of a project path, used for hashing.
///
/// Falls back to the path as given when it cannot be canonicalized.
pub fn resolve_project_path(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Project id used when none is given: the hash of the project path.
pub fn default_project_id(project_path: &str) -> String {
    project_hash(project_path)
}

/// CLI arguments for `pctx index`.
#[derive(Debug, Clone)]
pub struct IndexArgs {
    pub path: PathBuf,
    pub user: String,
    pub project_id: Option<String>,
    pub full: bool,
    pub timeout_secs: Option<u64>,
    pub json: bool,
    pub progress: ProgressMode,
}

/// Entry point for `pctx index`.
///
/// Ctrl-C cancels the run; the partial summary is still printed.
pub async fn run_index(config: &Config, args: IndexArgs) -> Result<()> {
    let project_path = resolve_project_path(&args.path);
    let project_id = args
        .project_id
        .clone()
        .unwrap_or_else(|| default_project_id(&project_path));

    let metric = config.retrieval.similarity_metric()?;
    let filter = DiscoveryFilter::from_config(&config.indexing)?;
    let pool = db::open(config).await?;
    if !config.embedding.is_enabled() {
        warn!("embedding provider is disabled; chunks will be recorded as embed errors");
    }
    let gateway = EmbeddingGateway::new(Arc::new(ModelHandle::from_config(&config.embedding)));
    let dims = match gateway.dims().await {
        Some(dims) => dims,
        None => configured_dims(&config.embedding).unwrap_or(0),
    };
    let store = SqliteVectorStore::new(pool.clone(), dims, metric)
        .with_batch_size(config.indexing.store_batch_size);

    let pipeline = IndexingPipeline::new(
        gateway,
        Arc::new(store),
        filter,
        IndexSettings::from_config(config),
    )
    .with_reporter(args.progress.reporter());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let options = IndexOptions {
        full: args.full,
        cancel,
        timeout: args
            .timeout_secs
            .or(config.indexing.timeout_secs)
            .map(Duration::from_secs),
    };
    let outcome = pipeline
        .run(Path::new(&project_path), &project_id, &args.user, &options)
        .await;
    interrupt.abort();
    pool.close().await;
    let result = outcome?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("index {}", project_path);
    println!("  project: {}", result.project_id);
    println!("  user: {}", result.user_id);
    println!("  files processed: {}", result.total_files_processed);
    println!("  chunks created: {}", result.total_chunks_created);
    println!("  embeddings stored: {}", result.total_embeddings_stored);
    println!("  errors: {}", result.errors.len());
    for err in result.errors.iter().take(20) {
        println!("    {:?} {}: {}", err.stage, err.file_path, err.message);
    }
    if result.errors.len() > 20 {
        println!("    ... {} more", result.errors.len() - 20);
    }
    println!("  duration: {} ms", result.duration_ms);
    if result.cancelled {
        println!("cancelled");
    } else {
        println!("ok");
    }
    Ok(())
}

/// Entry point for `pctx clear`.
pub async fn run_clear(
    config: &Config,
    path: &Path,
    user: &str,
    project_id: Option<String>,
) -> Result<()> {
    let project_path = resolve_project_path(path);
    let project_id = project_id.unwrap_or_else(|| default_project_id(&project_path));

    let pool = db::open(config).await?;
    let removed = clear_vectors(&pool, &project_id, user).await?;
    pool.close().await;

    println!("clear {}", project_path);
    println!("  project: {}", project_id);
    println!("  user: {}", user);
    println!("  rows removed: {}", removed);
    println!("ok");
    Ok(())
}
