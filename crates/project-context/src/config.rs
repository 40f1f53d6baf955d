//! Configuration parsing and validation.
//!
//! Project Context is configured via a TOML file (default
//! `./config/pctx.toml`). Every section except `[db]` has defaults, so a
//! minimal file only names the database path.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/pctx.sqlite"
//!
//! [chunking]
//! chunk_size = 1000
//! overlap = 200
//!
//! [retrieval]
//! threshold = 0.75
//! top_k = 5
//! metric = "cosine"
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use project_context_core::embedding::SimilarityMetric;
use project_context_core::prompt::DEFAULT_MIN_RELEVANCE;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub relevance: RelevanceConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub app: AppConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by consecutive windows.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Directory names pruned anywhere in the tree.
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
    /// Additional glob patterns, matched against the relative path.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Extensions (without dot, lower-case) treated as binary.
    #[serde(default = "default_binary_extensions")]
    pub binary_extensions: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    #[serde(default = "default_store_batch_size")]
    pub store_batch_size: usize,
    /// Abort the run (keeping partial results) after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            exclude_dirs: default_exclude_dirs(),
            exclude_globs: Vec::new(),
            binary_extensions: default_binary_extensions(),
            max_file_bytes: default_max_file_bytes(),
            embed_batch_size: default_embed_batch_size(),
            store_batch_size: default_store_batch_size(),
            timeout_secs: None,
            follow_symlinks: false,
        }
    }
}

fn default_exclude_dirs() -> Vec<String> {
    [
        "node_modules",
        ".git",
        ".hg",
        ".svn",
        "target",
        "dist",
        "build",
        "out",
        ".next",
        ".nuxt",
        "coverage",
        "__pycache__",
        ".venv",
        "venv",
        ".idea",
        ".vscode",
        "vendor",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_binary_extensions() -> Vec<String> {
    [
        "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "svgz", "tiff", "pdf", "zip", "gz",
        "tgz", "bz2", "xz", "7z", "rar", "tar", "jar", "war", "class", "exe", "dll", "so",
        "dylib", "a", "o", "obj", "lib", "bin", "wasm", "pyc", "pyo", "woff", "woff2", "ttf",
        "otf", "eot", "mp3", "mp4", "mov", "avi", "wav", "flac", "ogg", "webm", "sqlite", "db",
        "lockb",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}
fn default_embed_batch_size() -> usize {
    50
}
fn default_store_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// `"cosine"` or `"inner_product"`.
    #[serde(default = "default_metric")]
    pub metric: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            top_k: default_top_k(),
            metric: default_metric(),
        }
    }
}

impl RetrievalConfig {
    pub fn similarity_metric(&self) -> Result<SimilarityMetric> {
        self.metric.parse()
    }
}

fn default_threshold() -> f32 {
    0.75
}
fn default_top_k() -> usize {
    5
}
fn default_metric() -> String {
    "cosine".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelevanceConfig {
    /// Structured context is included only when the score exceeds this.
    #[serde(default = "default_min_score")]
    pub min_score: u8,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
        }
    }
}

fn default_min_score() -> u8 {
    DEFAULT_MIN_RELEVANCE
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    /// Texts per inference call for the local provider.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_temperature() -> f32 {
    0.2
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    /// Hosting application named in the assistant persona.
    #[serde(default)]
    pub context: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field invariants that serde alone cannot express.
pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.overlap ({}) must be < chunking.chunk_size ({})",
            config.chunking.overlap,
            config.chunking.chunk_size
        );
    }

    // Validate indexing
    if config.indexing.embed_batch_size == 0 || config.indexing.store_batch_size == 0 {
        bail!("indexing.embed_batch_size and indexing.store_batch_size must be >= 1");
    }
    if config.indexing.timeout_secs == Some(0) {
        bail!("indexing.timeout_secs must be > 0 when set");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    let metric = config.retrieval.similarity_metric()?;
    if metric == SimilarityMetric::Cosine && !(-1.0..=1.0).contains(&config.retrieval.threshold) {
        bail!("retrieval.threshold must be in [-1.0, 1.0] for cosine similarity");
    }

    if config.relevance.min_score > 10 {
        bail!("relevance.min_score must be in [0, 10]");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    // Validate generation
    match config.generation.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.generation.model.is_none() {
                bail!(
                    "generation.model must be specified when provider is '{}'",
                    config.generation.provider
                );
            }
        }
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_defaults() {
        let config = parse("[db]\npath = \"/tmp/x.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.indexing.embed_batch_size, 50);
        assert_eq!(config.indexing.store_batch_size, 100);
        assert!((config.retrieval.threshold - 0.75).abs() < 1e-6);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(
            config.retrieval.similarity_metric().unwrap(),
            SimilarityMetric::Cosine
        );
        assert_eq!(config.relevance.min_score, 3);
        assert!(!config.embedding.is_enabled());
        assert!(config.indexing.exclude_dirs.contains(&"node_modules".to_string()));
    }

    #[test]
    fn test_overlap_must_be_smaller() {
        let err = parse("[db]\npath = \"x\"\n[chunking]\nchunk_size = 100\noverlap = 100\n")
            .unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_unknown_metric_rejected() {
        assert!(parse("[db]\npath = \"x\"\n[retrieval]\nmetric = \"manhattan\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[retrieval]\nmetric = \"inner_product\"\nthreshold = 12.0\n").is_ok());
    }

    #[test]
    fn test_remote_embedding_requires_model_and_dims() {
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").is_err());
        assert!(parse(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n"
        )
        .is_ok());
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"local\"\n").is_ok());
    }

    #[test]
    fn test_unknown_generation_provider() {
        assert!(parse("[db]\npath = \"x\"\n[generation]\nprovider = \"bard\"\n").is_err());
    }
}
