//! Embedding Gateway: text in, vectors out, never a hard failure.
//!
//! [`ModelHandle`] owns the process-wide embedding backend. It is built
//! lazily by a [`BackendLoader`] on first use; concurrent first callers
//! await the same initialization, and a failed initialization is retried
//! on the next call instead of being cached.
//!
//! [`EmbeddingGateway`] wraps a shared handle and turns backend errors
//! into omissions: the caller compares [`EmbeddingBatch::requested`] to
//! the number of vectors returned and treats a mismatch as a partial
//! failure.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use project_context_core::embedding::EmbeddingBackend;

use crate::config::EmbeddingConfig;
use crate::embedding::create_backend;

/// Placeholder sent in place of empty or whitespace-only input.
pub const BLANK_PLACEHOLDER: &str = " ";

/// Per-item retries give up once this many fail before any succeeds.
pub const MAX_LEADING_ITEM_FAILURES: usize = 2;

/// Builds the embedding backend on first use.
#[async_trait]
pub trait BackendLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn EmbeddingBackend>>;
}

/// Loads the backend named by an [`EmbeddingConfig`].
pub struct ConfigLoader {
    config: EmbeddingConfig,
}

impl ConfigLoader {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BackendLoader for ConfigLoader {
    async fn load(&self) -> Result<Arc<dyn EmbeddingBackend>> {
        create_backend(&self.config).await
    }
}

/// Hands out an already-built backend.
pub struct StaticLoader(pub Arc<dyn EmbeddingBackend>);

#[async_trait]
impl BackendLoader for StaticLoader {
    async fn load(&self) -> Result<Arc<dyn EmbeddingBackend>> {
        Ok(Arc::clone(&self.0))
    }
}

/// Initialize-once, reuse-forever handle to the embedding backend.
pub struct ModelHandle {
    cell: OnceCell<Arc<dyn EmbeddingBackend>>,
    loader: Box<dyn BackendLoader>,
    load_attempts: AtomicUsize,
}

impl ModelHandle {
    pub fn new(loader: impl BackendLoader + 'static) -> Self {
        Self {
            cell: OnceCell::new(),
            loader: Box::new(loader),
            load_attempts: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::new(ConfigLoader::new(config.clone()))
    }

    pub fn from_backend(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self::new(StaticLoader(backend))
    }

    /// The backend, loading it if this is the first successful call.
    pub async fn get(&self) -> Result<Arc<dyn EmbeddingBackend>> {
        let backend = self
            .cell
            .get_or_try_init(|| async {
                self.load_attempts.fetch_add(1, Ordering::SeqCst);
                self.loader.load().await
            })
            .await?;
        Ok(Arc::clone(backend))
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// How many times the loader has been invoked.
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }
}

/// Result of one [`EmbeddingGateway::embed`] call.
///
/// `vectors` holds one entry per input that embedded successfully, in
/// input order; `omitted` lists the input indices that were dropped.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub requested: usize,
    pub omitted: Vec<usize>,
}

impl EmbeddingBatch {
    pub fn returned(&self) -> usize {
        self.vectors.len()
    }

    /// Every requested text produced a vector.
    pub fn is_complete(&self) -> bool {
        self.vectors.len() == self.requested
    }
}

/// Converts text into vectors of the backend's fixed dimension.
#[derive(Clone)]
pub struct EmbeddingGateway {
    handle: Arc<ModelHandle>,
}

impl EmbeddingGateway {
    pub fn new(handle: Arc<ModelHandle>) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &Arc<ModelHandle> {
        &self.handle
    }

    /// Dimensionality of the loaded backend, loading it if needed.
    pub async fn dims(&self) -> Option<usize> {
        self.handle.get().await.ok().map(|b| b.dims())
    }

    /// Embed `texts` in one backend call.
    ///
    /// If the batch call fails, each text is retried on its own and the
    /// ones that still fail are omitted. The retries stop early when the
    /// first [`MAX_LEADING_ITEM_FAILURES`] items all fail. Vectors of the
    /// wrong length are omitted too. Returns `None` when the backend cannot be loaded or no
    /// text could be embedded.
    pub async fn embed(&self, texts: &[String]) -> Option<EmbeddingBatch> {
        if texts.is_empty() {
            return Some(EmbeddingBatch::default());
        }

        let backend = match self.handle.get().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "embedding backend unavailable");
                return None;
            }
        };

        let inputs: Vec<String> = texts.iter().map(|t| placeholder_if_blank(t)).collect();
        let dims = backend.dims();

        let mut slots: Vec<Option<Vec<f32>>> = match backend.embed_batch(&inputs).await {
            Ok(vectors) if vectors.len() == inputs.len() => vectors.into_iter().map(Some).collect(),
            Ok(vectors) => {
                debug!(
                    requested = inputs.len(),
                    returned = vectors.len(),
                    "batch embedding count mismatch, retrying per item"
                );
                self.embed_each(backend.as_ref(), &inputs).await
            }
            Err(e) if inputs.len() > 1 => {
                debug!(error = %e, texts = inputs.len(), "batch embedding failed, retrying per item");
                self.embed_each(backend.as_ref(), &inputs).await
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "embedding failed");
                vec![None]
            }
        };

        for slot in slots.iter_mut() {
            if slot.as_ref().is_some_and(|v| v.len() != dims) {
                *slot = None;
            }
        }

        let mut batch = EmbeddingBatch {
            requested: texts.len(),
            ..Default::default()
        };
        for (i, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(v) => batch.vectors.push(v),
                None => batch.omitted.push(i),
            }
        }

        if batch.vectors.is_empty() {
            None
        } else {
            Some(batch)
        }
    }

    /// Embed a single text, e.g. a user question.
    pub async fn embed_one(&self, text: &str) -> Option<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await
            .and_then(|batch| batch.vectors.into_iter().next())
    }

    async fn embed_each(
        &self,
        backend: &dyn EmbeddingBackend,
        inputs: &[String],
    ) -> Vec<Option<Vec<f32>>> {
        let mut out = Vec::with_capacity(inputs.len());
        let mut any_ok = false;
        for (i, text) in inputs.iter().enumerate() {
            if !any_ok && i >= MAX_LEADING_ITEM_FAILURES {
                warn!(
                    attempted = i,
                    skipped = inputs.len() - i,
                    "embedding backend failing every item, giving up on batch"
                );
                out.resize(inputs.len(), None);
                break;
            }
            match backend.embed_batch(std::slice::from_ref(text)).await {
                Ok(mut v) if v.len() == 1 => {
                    any_ok = true;
                    out.push(v.pop());
                }
                Ok(_) => out.push(None),
                Err(e) => {
                    debug!(index = i, error = %e, "embedding item failed");
                    out.push(None);
                }
            }
        }
        out
    }
}

fn placeholder_if_blank(text: &str) -> String {
    if text.trim().is_empty() {
        BLANK_PLACEHOLDER.to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Embeds text as `[len, 1.0]`; fails on any batch containing "fail".
    struct FakeBackend {
        seen: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingBackend for FakeBackend {
        fn model_name(&self) -> &str {
            "fake"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.seen.lock().unwrap().extend(texts.iter().cloned());
            if texts.iter().any(|t| t.contains("fail")) {
                bail!("refused");
            }
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("short") {
                        vec![1.0]
                    } else {
                        vec![t.len() as f32, 1.0]
                    }
                })
                .collect())
        }
    }

    struct SlowCountingLoader {
        calls: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait]
    impl BackendLoader for SlowCountingLoader {
        async fn load(&self) -> Result<Arc<dyn EmbeddingBackend>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_first && n == 0 {
                bail!("model download failed");
            }
            Ok(Arc::new(FakeBackend::new()))
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_concurrent_first_use_loads_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = Arc::new(ModelHandle::new(SlowCountingLoader {
            calls: Arc::clone(&calls),
            fail_first: false,
        }));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let h = Arc::clone(&handle);
            tasks.push(tokio::spawn(async move { h.get().await.map(|b| b.dims()) }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap().unwrap(), 2);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handle.is_loaded());
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = ModelHandle::new(SlowCountingLoader {
            calls: Arc::clone(&calls),
            fail_first: true,
        });
        assert!(handle.get().await.is_err());
        assert!(!handle.is_loaded());
        assert!(handle.get().await.is_ok());
        assert_eq!(handle.load_attempts(), 2);
    }

    #[tokio::test]
    async fn test_blank_inputs_use_placeholder() {
        let backend = Arc::new(FakeBackend::new());
        let gateway = EmbeddingGateway::new(Arc::new(ModelHandle::from_backend(backend.clone())));

        let batch = gateway.embed(&texts(&["", "   ", "abc"])).await.unwrap();
        assert!(batch.is_complete());
        assert_eq!(batch.vectors[0], vec![1.0, 1.0]);
        let seen = backend.seen.lock().unwrap().clone();
        assert_eq!(seen, texts(&[" ", " ", "abc"]));
    }

    #[tokio::test]
    async fn test_failed_item_is_omitted_not_fatal() {
        let gateway =
            EmbeddingGateway::new(Arc::new(ModelHandle::from_backend(Arc::new(FakeBackend::new()))));

        let batch = gateway.embed(&texts(&["one", "fail here", "three"])).await.unwrap();
        assert_eq!(batch.requested, 3);
        assert_eq!(batch.returned(), 2);
        assert_eq!(batch.omitted, vec![1]);
        assert!(!batch.is_complete());
        assert_eq!(batch.vectors[1], vec![5.0, 1.0]);
    }

    /// Fails every call and counts them.
    struct DownBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingBackend for DownBackend {
        fn model_name(&self) -> &str {
            "down"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            bail!("connection refused");
        }
    }

    #[tokio::test]
    async fn test_down_backend_gives_up_after_leading_failures() {
        let backend = Arc::new(DownBackend {
            calls: AtomicUsize::new(0),
        });
        let gateway = EmbeddingGateway::new(Arc::new(ModelHandle::from_backend(backend.clone())));

        let inputs: Vec<String> = (0..50).map(|i| format!("text {}", i)).collect();
        assert!(gateway.embed(&inputs).await.is_none());
        assert_eq!(
            backend.calls.load(Ordering::SeqCst),
            1 + MAX_LEADING_ITEM_FAILURES
        );
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_omitted() {
        let gateway =
            EmbeddingGateway::new(Arc::new(ModelHandle::from_backend(Arc::new(FakeBackend::new()))));
        let batch = gateway.embed(&texts(&["short", "long enough"])).await.unwrap();
        assert_eq!(batch.omitted, vec![0]);
        assert!(gateway.embed_one("short").await.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_backend_returns_none() {
        let gateway = EmbeddingGateway::new(Arc::new(ModelHandle::from_config(
            &EmbeddingConfig::default(),
        )));
        assert!(gateway.embed(&texts(&["a"])).await.is_none());
        assert!(gateway.embed_one("a").await.is_none());
        assert!(gateway.embed(&[]).await.is_some());
    }
}
